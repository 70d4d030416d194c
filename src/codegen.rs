use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::bytecode::{Instruction, Opcode, Operand, UNPATCHED, Value, decode_call};
use crate::context::{CompilationContext, CompileError};
use crate::imports;
use crate::language::Msg;

pub mod c_runtime;

use self::c_runtime::{
    C_ARITH, C_BUILTINS, C_HEADERS, C_INTERPRETER, C_NATIVE_SUPPORT, C_OPCODES, C_SIDE_TABLES,
    C_TEXT_HELPERS, C_VALUE_TYPES, escape_c_string,
};

/// Exported native symbols are tried with this prefix first, then bare.
pub const NATIVE_PREFIX: &str = "jp_";
/// Ceiling on distinct variable names per compiled unit; the generated
/// program's slot array is sized from the observed count underneath it.
pub const MAX_VARIABLES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Spelling {
    Prefixed,
    Bare,
}

#[derive(Debug, Clone)]
struct NativeBinding {
    primary: String,
    fallback: String,
    lib_index: usize,
}

/// Lowers finished bytecode into a complete C translation unit: the
/// instruction stream as a static array plus an interpreter loop, sized
/// from what the bytecode actually uses.
pub fn generate(code: &[Instruction], ctx: &CompilationContext) -> Result<String, CompileError> {
    Generator::new(ctx).generate(code)
}

struct Generator<'a> {
    ctx: &'a CompilationContext,
    slots: FxHashMap<String, usize>,
    consts: Vec<Value>,
    members: Vec<String>,
    member_ids: FxHashMap<String, usize>,
    classes: Vec<String>,
    class_ids: FxHashMap<String, usize>,
    methods: Vec<String>,
    method_ids: FxHashMap<String, usize>,
    libraries: Vec<PathBuf>,
    natives: Vec<NativeBinding>,
    native_ids: FxHashMap<String, usize>,
}

impl<'a> Generator<'a> {
    fn new(ctx: &'a CompilationContext) -> Self {
        Self {
            ctx,
            slots: FxHashMap::default(),
            consts: Vec::new(),
            members: Vec::new(),
            member_ids: FxHashMap::default(),
            classes: Vec::new(),
            class_ids: FxHashMap::default(),
            methods: Vec::new(),
            method_ids: FxHashMap::default(),
            libraries: Vec::new(),
            natives: Vec::new(),
            native_ids: FxHashMap::default(),
        }
    }

    fn generate(mut self, code: &[Instruction]) -> Result<String, CompileError> {
        self.collect_classes();
        self.validate_natives(code)?;
        let rows = self.emit_rows(code)?;
        if self.slots.len() > MAX_VARIABLES {
            return Err(self
                .ctx
                .error(Msg::TooManyVariables, &[&MAX_VARIABLES.to_string()]));
        }
        Ok(self.assemble(&rows))
    }

    fn collect_classes(&mut self) {
        let mut names: Vec<String> = self.ctx.classes.keys().cloned().collect();
        names.sort();
        for name in names {
            self.class_ids.insert(name.clone(), self.classes.len());
            self.classes.push(name);
        }
    }

    /// Link-time validation. Declared natives bind to their declaring
    /// library; undeclared names are probed against every imported native
    /// library file (prefixed spelling first), failing on zero exporters
    /// and warning on more than one.
    fn validate_natives(&mut self, code: &[Instruction]) -> Result<(), CompileError> {
        let mut names: Vec<String> = code
            .iter()
            .filter(|instruction| instruction.op == Opcode::CallNative)
            .filter_map(|instruction| match &instruction.operand {
                Operand::Call(encoded) => decode_call(encoded).map(|(name, _)| name.to_string()),
                _ => None,
            })
            .collect();
        names.sort();
        names.dedup();

        self.libraries = self
            .ctx
            .modules
            .values()
            .filter(|module| module.native)
            .map(|module| imports::library_file(&module.path))
            .collect();
        self.libraries.sort();
        self.libraries.dedup();

        for name in names {
            let declared_library = self.ctx.natives.get(&name).map(|entry| entry.library.clone());
            let binding = if let Some(library) = declared_library {
                let lib_index = self.intern_library(library.clone());
                let spelling = probe_exports(&library, &name).unwrap_or(Spelling::Prefixed);
                self.binding_for(&name, spelling, lib_index)
            } else {
                let exporters: Vec<(usize, Spelling)> = self
                    .libraries
                    .iter()
                    .enumerate()
                    .filter_map(|(index, lib)| {
                        probe_exports(lib, &name).map(|spelling| (index, spelling))
                    })
                    .collect();
                if exporters.is_empty() {
                    return Err(self.ctx.error(Msg::NativeSymbolMissing, &[&name]));
                }
                if exporters.len() > 1 {
                    let all = exporters
                        .iter()
                        .map(|(index, _)| self.libraries[*index].display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    let chosen = self.libraries[exporters[0].0].display().to_string();
                    self.ctx
                        .warn(Msg::NativeSymbolAmbiguous, &[&name, &all, &chosen]);
                }
                let (lib_index, spelling) = exporters[0];
                self.binding_for(&name, spelling, lib_index)
            };
            self.native_ids.insert(name, self.natives.len());
            self.natives.push(binding);
        }
        Ok(())
    }

    fn binding_for(&self, name: &str, spelling: Spelling, lib_index: usize) -> NativeBinding {
        let prefixed = format!("{NATIVE_PREFIX}{name}");
        let (primary, fallback) = match spelling {
            Spelling::Prefixed => (prefixed, name.to_string()),
            Spelling::Bare => (name.to_string(), prefixed),
        };
        NativeBinding {
            primary,
            fallback,
            lib_index,
        }
    }

    fn intern_library(&mut self, library: PathBuf) -> usize {
        if let Some(index) = self.libraries.iter().position(|lib| *lib == library) {
            return index;
        }
        self.libraries.push(library);
        self.libraries.len() - 1
    }

    fn emit_rows(&mut self, code: &[Instruction]) -> Result<Vec<String>, CompileError> {
        let mut rows = Vec::with_capacity(code.len());
        for (index, instruction) in code.iter().enumerate() {
            let (a, b): (i64, i64) = match (instruction.op, &instruction.operand) {
                (Opcode::LoadConst, Operand::Value(value)) => {
                    (self.const_index(value) as i64, 0)
                }
                (Opcode::NewList, Operand::Value(Value::Int(count))) => (*count, 0),
                (Opcode::LoadVar | Opcode::StoreVar, Operand::Name(name)) => {
                    (self.slot(name) as i64, 0)
                }
                (Opcode::GetMember | Opcode::SetMember, Operand::Name(name)) => {
                    (self.member_id(name) as i64, 0)
                }
                (Opcode::NewObject, Operand::Name(class)) => {
                    let id = self
                        .class_ids
                        .get(class)
                        .copied()
                        .ok_or_else(|| self.ctx.error(Msg::UndefinedClass, &[class]))?;
                    (id as i64, 0)
                }
                (Opcode::Jump | Opcode::JumpIfFalse, Operand::Addr(addr)) => {
                    if *addr == UNPATCHED {
                        return Err(self
                            .ctx
                            .error(Msg::UnpatchedJump, &[&index.to_string()]));
                    }
                    (*addr as i64, 0)
                }
                (Opcode::Call, Operand::Call(encoded)) => {
                    let (name, arity) = decode_call(encoded).ok_or_else(|| {
                        self.ctx.error(Msg::UnpatchedJump, &[&index.to_string()])
                    })?;
                    let address = self.resolve_call(name, arity)?;
                    (address as i64, arity as i64)
                }
                (Opcode::CallNative, Operand::Call(encoded)) => {
                    let (name, arity) = decode_call(encoded).ok_or_else(|| {
                        self.ctx.error(Msg::UnpatchedJump, &[&index.to_string()])
                    })?;
                    if let Some(entry) = self.ctx.natives.get(name)
                        && entry.arity != arity
                    {
                        return Err(self.ctx.error(Msg::CallArityMismatch, &[
                            name,
                            &entry.arity.to_string(),
                            &arity.to_string(),
                        ]));
                    }
                    let id = self.native_ids.get(name).copied().ok_or_else(|| {
                        self.ctx.error(Msg::NativeSymbolMissing, &[name])
                    })?;
                    (id as i64, arity as i64)
                }
                (Opcode::CallMethod, Operand::Call(encoded)) => {
                    let (name, arity) = decode_call(encoded).ok_or_else(|| {
                        self.ctx.error(Msg::UnpatchedJump, &[&index.to_string()])
                    })?;
                    (self.method_id(name) as i64, arity as i64)
                }
                (Opcode::Break | Opcode::Continue, _) => {
                    return Err(self
                        .ctx
                        .error(Msg::UnpatchedJump, &[&index.to_string()]));
                }
                (_, Operand::None) => (0, 0),
                _ => {
                    return Err(self
                        .ctx
                        .error(Msg::UnpatchedJump, &[&index.to_string()]));
                }
            };
            rows.push(format!("    {{{}, {a}, {b}}},", opcode_name(instruction.op)));
        }
        Ok(rows)
    }

    fn resolve_call(&self, name: &str, arity: usize) -> Result<usize, CompileError> {
        if let Some((class, method)) = name.split_once('.') {
            let entry = self
                .ctx
                .classes
                .get(class)
                .ok_or_else(|| self.ctx.error(Msg::UndefinedClass, &[class]))?;
            let slot = entry
                .methods
                .get(method)
                .ok_or_else(|| self.ctx.error(Msg::UndefinedMethod, &[method, class]))?;
            if slot.params.len() != arity {
                return Err(self.ctx.error(Msg::CallArityMismatch, &[
                    name,
                    &slot.params.len().to_string(),
                    &arity.to_string(),
                ]));
            }
            return slot
                .address
                .ok_or_else(|| self.ctx.error(Msg::UndefinedMethod, &[method, class]));
        }
        let entry = self
            .ctx
            .functions
            .get(name)
            .ok_or_else(|| self.ctx.error(Msg::UndefinedFunction, &[name]))?;
        if entry.params.len() != arity {
            return Err(self.ctx.error(Msg::CallArityMismatch, &[
                name,
                &entry.params.len().to_string(),
                &arity.to_string(),
            ]));
        }
        entry
            .address
            .ok_or_else(|| self.ctx.error(Msg::UndefinedFunction, &[name]))
    }

    /// Stable slot index assigned on first sight.
    fn slot(&mut self, name: &str) -> usize {
        if let Some(index) = self.slots.get(name) {
            return *index;
        }
        let index = self.slots.len();
        self.slots.insert(name.to_string(), index);
        index
    }

    fn const_index(&mut self, value: &Value) -> usize {
        if let Some(index) = self.consts.iter().position(|existing| existing == value) {
            return index;
        }
        self.consts.push(value.clone());
        self.consts.len() - 1
    }

    fn member_id(&mut self, name: &str) -> usize {
        if let Some(index) = self.member_ids.get(name) {
            return *index;
        }
        let index = self.members.len();
        self.member_ids.insert(name.to_string(), index);
        self.members.push(name.to_string());
        index
    }

    fn method_id(&mut self, name: &str) -> usize {
        if let Some(index) = self.method_ids.get(name) {
            return *index;
        }
        let index = self.methods.len();
        self.method_ids.insert(name.to_string(), index);
        self.methods.push(name.to_string());
        index
    }

    fn assemble(&self, rows: &[String]) -> String {
        let mut out = String::with_capacity(64 * 1024);
        out.push_str(C_HEADERS);

        let defines = [
            ("JP_VAR_COUNT", self.slots.len().max(1)),
            ("JP_STACK_MAX", 4096),
            ("JP_FRAMES_MAX", 1024),
            ("JP_LISTS_MAX", 1024),
            ("JP_LIST_CAP", 256),
            ("JP_OBJECTS_MAX", 1024),
            ("JP_MEMBER_COUNT", self.members.len().max(1)),
            ("JP_CLASS_COUNT", self.classes.len().max(1)),
            ("JP_METHOD_COUNT", self.methods.len().max(1)),
        ];
        for (name, value) in defines {
            out.push_str(&format!("#define {name} {value}\n"));
        }
        out.push('\n');

        let messages = [
            ("JP_MSG_DIV_ZERO", Msg::RtDivisionByZero),
            ("JP_MSG_MOD_ZERO", Msg::RtModuloByZero),
            ("JP_MSG_INDEX_OOB", Msg::RtIndexOutOfBounds),
            ("JP_MSG_NOT_A_LIST", Msg::RtNotAList),
            ("JP_MSG_NOT_AN_OBJECT", Msg::RtNotAnObject),
            ("JP_MSG_BAD_OPERANDS", Msg::RtBadOperands),
            ("JP_MSG_UNKNOWN_METHOD", Msg::RtUnknownMethod),
            ("JP_MSG_ARITY", Msg::RtArityMismatch),
            ("JP_MSG_LIB_LOAD", Msg::RtLibraryLoadFailed),
            ("JP_MSG_SYMBOL", Msg::RtSymbolResolveFailed),
            ("JP_MSG_LIST_LIMIT", Msg::RtListLimit),
            ("JP_MSG_OBJECT_LIMIT", Msg::RtObjectLimit),
            ("JP_MSG_STACK_OVERFLOW", Msg::RtStackOverflow),
            ("JP_MSG_FRAME_OVERFLOW", Msg::RtFrameOverflow),
            ("JP_TXT_TRUE", Msg::BoolTrue),
            ("JP_TXT_FALSE", Msg::BoolFalse),
            ("JP_TXT_NULL", Msg::TypeNull),
            ("JP_TXT_INT", Msg::TypeInt),
            ("JP_TXT_FLOAT", Msg::TypeFloat),
            ("JP_TXT_TEXT", Msg::TypeText),
            ("JP_TXT_BOOL", Msg::TypeBool),
            ("JP_TXT_LIST", Msg::TypeList),
            ("JP_TXT_OBJECT", Msg::TypeObject),
        ];
        for (name, key) in messages {
            out.push_str(&format!(
                "static const char *{name} = \"{}\";\n",
                escape_c_string(self.ctx.lang.msg(key))
            ));
        }
        out.push('\n');

        out.push_str("static const char *jp_class_names[JP_CLASS_COUNT] = {");
        if self.classes.is_empty() {
            out.push_str(" \"\" ");
        } else {
            let rendered = self
                .classes
                .iter()
                .map(|name| format!("\"{}\"", escape_c_string(name)))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(" {rendered} "));
        }
        out.push_str("};\n\n");

        out.push_str(C_VALUE_TYPES);
        out.push_str(C_SIDE_TABLES);
        out.push_str(C_TEXT_HELPERS);
        out.push_str(C_ARITH);
        out.push_str(C_BUILTINS);

        self.assemble_natives(&mut out);
        self.assemble_consts(&mut out);
        out.push_str(C_OPCODES);

        out.push_str("static const JpInstr jp_code[] = {\n");
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        if rows.is_empty() {
            out.push_str("    {OP_HALT, 0, 0},\n");
        }
        out.push_str("};\n\n");

        self.assemble_dispatch(&mut out);
        out.push_str(C_INTERPRETER);
        out
    }

    fn assemble_natives(&self, out: &mut String) {
        if self.natives.is_empty() {
            // The interpreter's CALL_NATIVE case still needs the symbols to
            // exist, even though no instruction reaches them.
            out.push_str("typedef Value (*JpNativeFn)(Value *args, int argc);\n");
            out.push_str("static JpNativeFn jp_natives[1];\n");
            out.push_str("static void jp_load_natives(void) {}\n\n");
            return;
        }
        out.push_str(C_NATIVE_SUPPORT);
        out.push_str(&format!("#define JP_NATIVE_COUNT {}\n", self.natives.len()));
        out.push_str(&format!(
            "#define JP_NATIVE_LIB_COUNT {}\n\n",
            self.libraries.len().max(1)
        ));
        out.push_str("typedef Value (*JpNativeFn)(Value *args, int argc);\n");
        out.push_str("static JpNativeFn jp_natives[JP_NATIVE_COUNT];\n");
        out.push_str("static void *jp_native_handles[JP_NATIVE_LIB_COUNT];\n");
        out.push_str("static const char *jp_native_libs[JP_NATIVE_LIB_COUNT] = {\n");
        for library in &self.libraries {
            out.push_str(&format!(
                "    \"{}\",\n",
                escape_c_string(&library.display().to_string())
            ));
        }
        out.push_str("};\n\n");
        out.push_str(
            "typedef struct { const char *primary; const char *fallback; int32_t lib; } JpNativeSpec;\n",
        );
        out.push_str("static const JpNativeSpec jp_native_specs[JP_NATIVE_COUNT] = {\n");
        for binding in &self.natives {
            out.push_str(&format!(
                "    {{\"{}\", \"{}\", {}}},\n",
                escape_c_string(&binding.primary),
                escape_c_string(&binding.fallback),
                binding.lib_index
            ));
        }
        out.push_str("};\n\n");
        // Every symbol is resolved once before the program body runs;
        // failure is fatal at startup.
        out.push_str(
            r#"static void jp_load_natives(void) {
    for (int i = 0; i < JP_NATIVE_LIB_COUNT; ++i) {
        jp_native_handles[i] = jp_open_library(jp_native_libs[i]);
        if (jp_native_handles[i] == NULL) {
            fprintf(stderr, "%s: %s\n", JP_MSG_LIB_LOAD, jp_native_libs[i]);
            exit(1);
        }
    }
    for (int i = 0; i < JP_NATIVE_COUNT; ++i) {
        void *fn = jp_resolve_symbol(jp_native_handles[jp_native_specs[i].lib], jp_native_specs[i].primary);
        if (fn == NULL) {
            fn = jp_resolve_symbol(jp_native_handles[jp_native_specs[i].lib], jp_native_specs[i].fallback);
        }
        if (fn == NULL) {
            fprintf(stderr, "%s: %s\n", JP_MSG_SYMBOL, jp_native_specs[i].primary);
            exit(1);
        }
        jp_natives[i] = (JpNativeFn)fn;
    }
}

"#,
        );
    }

    fn assemble_consts(&self, out: &mut String) {
        out.push_str("static const Value jp_consts[] = {\n");
        if self.consts.is_empty() {
            out.push_str("    { VAL_NULL, 0, 0, NULL, 0 },\n");
        }
        for value in &self.consts {
            out.push_str(&format!("    {},\n", const_initializer(value)));
        }
        out.push_str("};\n\n");
    }

    fn assemble_dispatch(&self, out: &mut String) {
        out.push_str(
            "static const JpMethodSlot jp_dispatch[JP_CLASS_COUNT][JP_METHOD_COUNT] = {\n",
        );
        if self.classes.is_empty() || self.methods.is_empty() {
            out.push_str("    { {-1, 0} },\n");
        } else {
            for class in &self.classes {
                let entry = &self.ctx.classes[class];
                let row = self
                    .methods
                    .iter()
                    .map(|method| match entry.methods.get(method) {
                        Some(slot) => format!(
                            "{{{}, {}}}",
                            slot.address.map(|addr| addr as i64).unwrap_or(-1),
                            slot.params.len()
                        ),
                        None => "{-1, 0}".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!("    {{ {row} }},\n"));
            }
        }
        out.push_str("};\n\n");
    }
}

fn const_initializer(value: &Value) -> String {
    match value {
        Value::Int(v) if *v == i64::MIN => "{ VAL_INT, INT64_MIN, 0, NULL, 0 }".to_string(),
        Value::Int(v) => format!("{{ VAL_INT, {v}, 0, NULL, 0 }}"),
        Value::Float(v) if v.is_finite() => format!("{{ VAL_FLOAT, 0, {v:?}, NULL, 0 }}"),
        Value::Float(_) => "{ VAL_FLOAT, 0, 0, NULL, 0 }".to_string(),
        Value::Str(s) => format!("{{ VAL_STR, 0, 0, \"{}\", 0 }}", escape_c_string(s)),
        Value::Bool(b) => format!("{{ VAL_BOOL, {}, 0, NULL, 0 }}", *b as i64),
    }
}

fn opcode_name(op: Opcode) -> &'static str {
    match op {
        Opcode::LoadConst => "OP_LOAD_CONST",
        Opcode::PushNull => "OP_PUSH_NULL",
        Opcode::LoadVar => "OP_LOAD_VAR",
        Opcode::StoreVar => "OP_STORE_VAR",
        Opcode::Add => "OP_ADD",
        Opcode::Sub => "OP_SUB",
        Opcode::Mul => "OP_MUL",
        Opcode::Div => "OP_DIV",
        Opcode::Mod => "OP_MOD",
        Opcode::Neg => "OP_NEG",
        Opcode::Not => "OP_NOT",
        Opcode::And => "OP_AND",
        Opcode::Or => "OP_OR",
        Opcode::CmpEq => "OP_CMP_EQ",
        Opcode::CmpNe => "OP_CMP_NE",
        Opcode::CmpLt => "OP_CMP_LT",
        Opcode::CmpLe => "OP_CMP_LE",
        Opcode::CmpGt => "OP_CMP_GT",
        Opcode::CmpGe => "OP_CMP_GE",
        Opcode::Jump => "OP_JUMP",
        Opcode::JumpIfFalse => "OP_JUMP_IF_FALSE",
        Opcode::Break | Opcode::Continue => "OP_JUMP",
        Opcode::Call => "OP_CALL",
        Opcode::CallNative => "OP_CALL_NATIVE",
        Opcode::CallMethod => "OP_CALL_METHOD",
        Opcode::NewObject => "OP_NEW_OBJECT",
        Opcode::Return => "OP_RETURN",
        Opcode::ReturnValue => "OP_RETURN_VALUE",
        Opcode::GetMember => "OP_GET_MEMBER",
        Opcode::SetMember => "OP_SET_MEMBER",
        Opcode::NewList => "OP_NEW_LIST",
        Opcode::IndexGet => "OP_INDEX_GET",
        Opcode::IndexSet => "OP_INDEX_SET",
        Opcode::ListLen => "OP_LIST_LEN",
        Opcode::ListAppend => "OP_LIST_APPEND",
        Opcode::ListRemove => "OP_LIST_REMOVE",
        Opcode::Print => "OP_PRINT",
        Opcode::Input => "OP_INPUT",
        Opcode::ToInt => "OP_TO_INT",
        Opcode::ToFloat => "OP_TO_FLOAT",
        Opcode::ToText => "OP_TO_TEXT",
        Opcode::ToBool => "OP_TO_BOOL",
        Opcode::TypeName => "OP_TYPE_NAME",
        Opcode::Pop => "OP_POP",
        Opcode::Halt => "OP_HALT",
    }
}

/// Looks for the symbol's bytes in the library file, prefixed spelling
/// first. Good enough for both real shared objects (export tables keep
/// symbol names verbatim) and the wrapper fixtures used in tests.
fn probe_exports(library: &Path, name: &str) -> Option<Spelling> {
    let bytes = fs::read(library).ok()?;
    let prefixed = format!("{NATIVE_PREFIX}{name}");
    if contains(&bytes, prefixed.as_bytes()) {
        return Some(Spelling::Prefixed);
    }
    if contains(&bytes, name.as_bytes()) {
        return Some(Spelling::Bare);
    }
    None
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
