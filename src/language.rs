use rustc_hash::FxHashMap;

use crate::token::TokenKind;

/// Built-in operations reachable by plain name at call sites. Conversions and
/// list primitives get dedicated bytecode rather than a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinOp {
    Print,
    Input,
    ToInt,
    ToFloat,
    ToText,
    ToBool,
    TypeName,
    Length,
    Append,
    Remove,
}

impl BuiltinOp {
    pub fn arity(self) -> usize {
        match self {
            BuiltinOp::Input => 0,
            BuiltinOp::Append | BuiltinOp::Remove => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    Portuguese,
    English,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Msg {
    // Lexical
    TabIndentation,
    InvalidDedent,
    SecondDecimalPoint,
    IntegerOverflow,
    UnterminatedString,
    UnexpectedCharacter,
    // Syntax
    ExpectedToken,
    LoopControlOutsideLoop,
    BuiltinArity,
    BadInterpolation,
    NativeOutsideLibrary,
    // Semantic / link
    UndefinedFunction,
    UndefinedMethod,
    UndefinedClass,
    ModuleNotFound,
    NativeSymbolMissing,
    NativeSymbolAmbiguous,
    DuplicateClass,
    TooManyVariables,
    CallArityMismatch,
    UnpatchedJump,
    // Runtime notices embedded into the generated program
    RtDivisionByZero,
    RtModuloByZero,
    RtIndexOutOfBounds,
    RtNotAList,
    RtNotAnObject,
    RtBadOperands,
    RtUnknownMethod,
    RtArityMismatch,
    RtLibraryLoadFailed,
    RtSymbolResolveFailed,
    RtListLimit,
    RtObjectLimit,
    RtStackOverflow,
    RtFrameOverflow,
    // Value rendering in the generated program
    TypeInt,
    TypeFloat,
    TypeText,
    TypeBool,
    TypeList,
    TypeObject,
    TypeNull,
    BoolTrue,
    BoolFalse,
}

/// Keyword, builtin and message tables for one source locale. Loaded once per
/// compilation; every diagnostic and every runtime notice embedded into the
/// generated program goes through here.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    pub locale: Locale,
    keywords: FxHashMap<&'static str, TokenKind>,
    builtins: FxHashMap<&'static str, BuiltinOp>,
    messages: FxHashMap<Msg, &'static str>,
}

const KEYWORD_KINDS: [TokenKind; 21] = [
    TokenKind::If,
    TokenKind::Else,
    TokenKind::While,
    TokenKind::Repeat,
    TokenKind::For,
    TokenKind::From,
    TokenKind::To,
    TokenKind::Break,
    TokenKind::Continue,
    TokenKind::Function,
    TokenKind::Return,
    TokenKind::Class,
    TokenKind::Import,
    TokenKind::As,
    TokenKind::Native,
    TokenKind::SelfRef,
    TokenKind::And,
    TokenKind::Or,
    TokenKind::Not,
    TokenKind::True,
    TokenKind::False,
];

const KEYWORDS_PT: [&str; 21] = [
    "se",
    "senao",
    "enquanto",
    "repetir",
    "para",
    "de",
    "ate",
    "parar",
    "continuar",
    "funcao",
    "retornar",
    "classe",
    "importar",
    "como",
    "nativo",
    "auto",
    "e",
    "ou",
    "nao",
    "verdadeiro",
    "falso",
];

const KEYWORDS_EN: [&str; 21] = [
    "if",
    "else",
    "while",
    "repeat",
    "for",
    "from",
    "to",
    "break",
    "continue",
    "function",
    "return",
    "class",
    "import",
    "as",
    "native",
    "self",
    "and",
    "or",
    "not",
    "true",
    "false",
];

const BUILTIN_OPS: [BuiltinOp; 10] = [
    BuiltinOp::Print,
    BuiltinOp::Input,
    BuiltinOp::ToInt,
    BuiltinOp::ToFloat,
    BuiltinOp::ToText,
    BuiltinOp::ToBool,
    BuiltinOp::TypeName,
    BuiltinOp::Length,
    BuiltinOp::Append,
    BuiltinOp::Remove,
];

const BUILTINS_PT: [&str; 10] = [
    "saida",
    "entrada",
    "inteiro",
    "decimal",
    "texto",
    "booleano",
    "tipo",
    "tamanho",
    "adicionar",
    "remover",
];

const BUILTINS_EN: [&str; 10] = [
    "print",
    "input",
    "int",
    "float",
    "text",
    "bool",
    "typename",
    "length",
    "append",
    "remove",
];

const MESSAGES_PT: [(Msg, &str); 44] = [
    (Msg::TabIndentation, "tabulacao nao e aceita na indentacao (linha {0})"),
    (Msg::InvalidDedent, "indentacao invalida na linha {0}"),
    (Msg::SecondDecimalPoint, "numero com mais de um ponto decimal na linha {0}"),
    (Msg::IntegerOverflow, "literal inteiro '{0}' fora do intervalo na linha {1}"),
    (Msg::UnterminatedString, "texto nao terminado na linha {0}"),
    (Msg::UnexpectedCharacter, "caractere inesperado '{0}' na linha {1}"),
    (Msg::ExpectedToken, "esperava {0}, encontrou {1} na linha {2}"),
    (Msg::LoopControlOutsideLoop, "comando de laco fora de um laco na linha {0}"),
    (Msg::BuiltinArity, "'{0}' espera {1} argumento(s), recebeu {2} na linha {3}"),
    (Msg::BadInterpolation, "expressao invalida em '{0}' na linha {1}"),
    (Msg::NativeOutsideLibrary, "declaracao nativa fora de uma biblioteca na linha {0}"),
    (Msg::UndefinedFunction, "funcao '{0}' nao definida"),
    (Msg::UndefinedMethod, "metodo '{0}' nao definido na classe '{1}'"),
    (Msg::UndefinedClass, "classe '{0}' nao definida"),
    (Msg::ModuleNotFound, "modulo '{0}' nao encontrado"),
    (Msg::NativeSymbolMissing, "funcao nativa '{0}' nao encontrada em nenhuma biblioteca importada"),
    (Msg::NativeSymbolAmbiguous, "aviso: simbolo nativo '{0}' exportado por {1}; usando {2}"),
    (Msg::DuplicateClass, "aviso: classe '{0}' redefinida por {1} (antes em {2})"),
    (Msg::TooManyVariables, "limite de variaveis excedido ({0})"),
    (Msg::CallArityMismatch, "funcao '{0}' espera {1} argumento(s), recebeu {2}"),
    (Msg::UnpatchedJump, "salto sem destino no indice {0}"),
    (Msg::RtDivisionByZero, "divisao por zero"),
    (Msg::RtModuloByZero, "resto por zero"),
    (Msg::RtIndexOutOfBounds, "indice fora dos limites"),
    (Msg::RtNotAList, "o valor nao e uma lista"),
    (Msg::RtNotAnObject, "o valor nao e um objeto"),
    (Msg::RtBadOperands, "operacao invalida entre valores"),
    (Msg::RtUnknownMethod, "metodo desconhecido"),
    (Msg::RtArityMismatch, "numero de argumentos invalido"),
    (Msg::RtLibraryLoadFailed, "falha ao carregar biblioteca"),
    (Msg::RtSymbolResolveFailed, "falha ao resolver simbolo nativo"),
    (Msg::RtListLimit, "limite de listas excedido"),
    (Msg::RtObjectLimit, "limite de objetos excedido"),
    (Msg::RtStackOverflow, "pilha de avaliacao excedida"),
    (Msg::RtFrameOverflow, "pilha de chamadas excedida"),
    (Msg::TypeInt, "inteiro"),
    (Msg::TypeFloat, "decimal"),
    (Msg::TypeText, "texto"),
    (Msg::TypeBool, "booleano"),
    (Msg::TypeList, "lista"),
    (Msg::TypeObject, "objeto"),
    (Msg::TypeNull, "nulo"),
    (Msg::BoolTrue, "verdadeiro"),
    (Msg::BoolFalse, "falso"),
];

const MESSAGES_EN: [(Msg, &str); 44] = [
    (Msg::TabIndentation, "tabs are not accepted in indentation (line {0})"),
    (Msg::InvalidDedent, "invalid indentation at line {0}"),
    (Msg::SecondDecimalPoint, "number with more than one decimal point at line {0}"),
    (Msg::IntegerOverflow, "integer literal '{0}' out of range at line {1}"),
    (Msg::UnterminatedString, "unterminated string at line {0}"),
    (Msg::UnexpectedCharacter, "unexpected character '{0}' at line {1}"),
    (Msg::ExpectedToken, "expected {0}, found {1} at line {2}"),
    (Msg::LoopControlOutsideLoop, "loop control statement outside a loop at line {0}"),
    (Msg::BuiltinArity, "'{0}' expects {1} argument(s), got {2} at line {3}"),
    (Msg::BadInterpolation, "invalid expression in '{0}' at line {1}"),
    (Msg::NativeOutsideLibrary, "native declaration outside a library at line {0}"),
    (Msg::UndefinedFunction, "function '{0}' is not defined"),
    (Msg::UndefinedMethod, "method '{0}' is not defined on class '{1}'"),
    (Msg::UndefinedClass, "class '{0}' is not defined"),
    (Msg::ModuleNotFound, "module '{0}' not found"),
    (Msg::NativeSymbolMissing, "native function '{0}' not found in any imported library"),
    (Msg::NativeSymbolAmbiguous, "warning: native symbol '{0}' exported by {1}; binding {2}"),
    (Msg::DuplicateClass, "warning: class '{0}' redefined by {1} (previously in {2})"),
    (Msg::TooManyVariables, "variable limit exceeded ({0})"),
    (Msg::CallArityMismatch, "function '{0}' expects {1} argument(s), got {2}"),
    (Msg::UnpatchedJump, "jump without a target at index {0}"),
    (Msg::RtDivisionByZero, "division by zero"),
    (Msg::RtModuloByZero, "modulo by zero"),
    (Msg::RtIndexOutOfBounds, "index out of bounds"),
    (Msg::RtNotAList, "value is not a list"),
    (Msg::RtNotAnObject, "value is not an object"),
    (Msg::RtBadOperands, "invalid operation between values"),
    (Msg::RtUnknownMethod, "unknown method"),
    (Msg::RtArityMismatch, "invalid number of arguments"),
    (Msg::RtLibraryLoadFailed, "failed to load library"),
    (Msg::RtSymbolResolveFailed, "failed to resolve native symbol"),
    (Msg::RtListLimit, "list limit exceeded"),
    (Msg::RtObjectLimit, "object limit exceeded"),
    (Msg::RtStackOverflow, "evaluation stack exhausted"),
    (Msg::RtFrameOverflow, "call stack exhausted"),
    (Msg::TypeInt, "int"),
    (Msg::TypeFloat, "float"),
    (Msg::TypeText, "text"),
    (Msg::TypeBool, "bool"),
    (Msg::TypeList, "list"),
    (Msg::TypeObject, "object"),
    (Msg::TypeNull, "null"),
    (Msg::BoolTrue, "true"),
    (Msg::BoolFalse, "false"),
];

impl LanguageTable {
    pub fn portuguese() -> Self {
        Self::build(Locale::Portuguese, &KEYWORDS_PT, &BUILTINS_PT, &MESSAGES_PT)
    }

    pub fn english() -> Self {
        Self::build(Locale::English, &KEYWORDS_EN, &BUILTINS_EN, &MESSAGES_EN)
    }

    fn build(
        locale: Locale,
        keywords: &[&'static str; 21],
        builtins: &[&'static str; 10],
        messages: &[(Msg, &'static str); 44],
    ) -> Self {
        let keywords = keywords
            .iter()
            .zip(KEYWORD_KINDS.iter())
            .map(|(word, kind)| (*word, kind.clone()))
            .collect();
        let builtins = builtins
            .iter()
            .zip(BUILTIN_OPS.iter())
            .map(|(word, op)| (*word, *op))
            .collect();
        let messages = messages.iter().copied().collect();
        Self {
            locale,
            keywords,
            builtins,
            messages,
        }
    }

    pub fn keyword(&self, ident: &str) -> Option<TokenKind> {
        self.keywords.get(ident).cloned()
    }

    pub fn builtin(&self, name: &str) -> Option<BuiltinOp> {
        self.builtins.get(name).copied()
    }

    pub fn msg(&self, key: Msg) -> &'static str {
        self.messages
            .get(&key)
            .copied()
            .unwrap_or("mensagem desconhecida")
    }

    /// Render the boolean literal the way `texto()` and `saida()` spell it.
    pub fn bool_text(&self, value: bool) -> &'static str {
        if value {
            self.msg(Msg::BoolTrue)
        } else {
            self.msg(Msg::BoolFalse)
        }
    }
}

/// Substitutes `{0}`, `{1}`, ... placeholders in a message template.
pub fn format_message(template: &str, args: &[&str]) -> String {
    let mut rendered = template.to_string();
    for (index, arg) in args.iter().enumerate() {
        rendered = rendered.replace(&format!("{{{index}}}"), arg);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_lookup_follows_locale() {
        let pt = LanguageTable::portuguese();
        let en = LanguageTable::english();
        assert_eq!(pt.keyword("se"), Some(TokenKind::If));
        assert_eq!(pt.keyword("if"), None);
        assert_eq!(en.keyword("if"), Some(TokenKind::If));
        assert_eq!(en.keyword("se"), None);
    }

    #[test]
    fn builtin_lookup_follows_locale() {
        let pt = LanguageTable::portuguese();
        assert_eq!(pt.builtin("saida"), Some(BuiltinOp::Print));
        assert_eq!(pt.builtin("tamanho"), Some(BuiltinOp::Length));
        assert_eq!(pt.builtin("print"), None);
    }

    #[test]
    fn formats_placeholders_in_order() {
        let rendered = format_message("esperava {0}, encontrou {1} na linha {2}", &["x", "y", "3"]);
        assert_eq!(rendered, "esperava x, encontrou y na linha 3");
    }

    #[test]
    fn every_locale_carries_every_message() {
        for table in [LanguageTable::portuguese(), LanguageTable::english()] {
            assert_ne!(table.msg(Msg::RtDivisionByZero), "mensagem desconhecida");
            assert_ne!(table.msg(Msg::TypeNull), "mensagem desconhecida");
        }
    }
}
