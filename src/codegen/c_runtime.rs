use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

pub const C_HEADERS: &str = r#"#include <inttypes.h>
#include <math.h>
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>
#include <string.h>
#ifdef _WIN32
#include <windows.h>
#else
#include <dlfcn.h>
#endif

"#;

pub const C_VALUE_TYPES: &str = r#"typedef enum {
    VAL_NULL,
    VAL_INT,
    VAL_FLOAT,
    VAL_STR,
    VAL_BOOL,
    VAL_LIST,
    VAL_OBJ
} ValueTag;

typedef struct {
    ValueTag tag;
    int64_t i;
    double f;
    const char *s;
    int32_t h;
} Value;

static Value jp_null(void) { Value v = { VAL_NULL, 0, 0, NULL, 0 }; return v; }
static Value jp_int(int64_t x) { Value v = { VAL_INT, x, 0, NULL, 0 }; return v; }
static Value jp_float(double x) { Value v = { VAL_FLOAT, 0, x, NULL, 0 }; return v; }
static Value jp_str(const char *s) { Value v = { VAL_STR, 0, 0, s, 0 }; return v; }
static Value jp_bool(int x) { Value v = { VAL_BOOL, x != 0, 0, NULL, 0 }; return v; }
static Value jp_list_handle(int32_t h) { Value v = { VAL_LIST, 0, 0, NULL, h }; return v; }
static Value jp_obj_handle(int32_t h) { Value v = { VAL_OBJ, 0, 0, NULL, h }; return v; }

"#;

pub const C_SIDE_TABLES: &str = r#"typedef struct {
    int len;
    Value items[JP_LIST_CAP];
} JpList;
static JpList jp_lists[JP_LISTS_MAX];
static int jp_list_count = 0;

typedef struct {
    int class_id;
    Value members[JP_MEMBER_COUNT];
} JpObject;
static JpObject jp_objects[JP_OBJECTS_MAX];
static int jp_object_count = 0;

"#;

pub const C_TEXT_HELPERS: &str = r#"static char *jp_strdup(const char *s) {
    size_t n = strlen(s) + 1;
    char *copy = malloc(n);
    memcpy(copy, s, n);
    return copy;
}

static const char *jp_to_text(Value v) {
    char buffer[64];
    switch (v.tag) {
        case VAL_INT:
            snprintf(buffer, sizeof buffer, "%" PRId64, v.i);
            return jp_strdup(buffer);
        case VAL_FLOAT:
            snprintf(buffer, sizeof buffer, "%g", v.f);
            return jp_strdup(buffer);
        case VAL_BOOL:
            return v.i ? JP_TXT_TRUE : JP_TXT_FALSE;
        case VAL_STR:
            return v.s ? v.s : "";
        case VAL_LIST: {
            char *out = malloc(4096);
            size_t used = 0;
            JpList *list = &jp_lists[v.h];
            out[used++] = '[';
            for (int i = 0; i < list->len; ++i) {
                const char *item = jp_to_text(list->items[i]);
                size_t need = strlen(item);
                if (used + need + 4 >= 4096) {
                    break;
                }
                if (i > 0) {
                    out[used++] = ',';
                    out[used++] = ' ';
                }
                memcpy(out + used, item, need);
                used += need;
            }
            out[used++] = ']';
            out[used] = '\0';
            return out;
        }
        case VAL_OBJ:
            return jp_class_names[jp_objects[v.h].class_id];
        default:
            return JP_TXT_NULL;
    }
}

static const char *jp_type_name(Value v) {
    switch (v.tag) {
        case VAL_INT: return JP_TXT_INT;
        case VAL_FLOAT: return JP_TXT_FLOAT;
        case VAL_STR: return JP_TXT_TEXT;
        case VAL_BOOL: return JP_TXT_BOOL;
        case VAL_LIST: return JP_TXT_LIST;
        case VAL_OBJ: return JP_TXT_OBJECT;
        default: return JP_TXT_NULL;
    }
}

static int jp_truthy(Value v) {
    switch (v.tag) {
        case VAL_INT: return v.i != 0;
        case VAL_FLOAT: return v.f != 0;
        case VAL_BOOL: return v.i != 0;
        case VAL_STR: return v.s != NULL && v.s[0] != '\0';
        case VAL_LIST: return jp_lists[v.h].len > 0;
        case VAL_OBJ: return 1;
        default: return 0;
    }
}

"#;

pub const C_ARITH: &str = r#"static int jp_int_like(Value v, int64_t *out) {
    if (v.tag == VAL_INT || v.tag == VAL_BOOL) {
        *out = v.i;
        return 1;
    }
    return 0;
}

static int jp_numeric(Value v, double *out, int *is_float) {
    switch (v.tag) {
        case VAL_INT:
        case VAL_BOOL:
            *out = (double)v.i;
            *is_float = 0;
            return 1;
        case VAL_FLOAT:
            *out = v.f;
            *is_float = 1;
            return 1;
        case VAL_STR: {
            if (v.s == NULL || v.s[0] == '\0') {
                return 0;
            }
            char *end = NULL;
            double parsed = strtod(v.s, &end);
            if (end == NULL || *end != '\0') {
                return 0;
            }
            *out = parsed;
            *is_float = strchr(v.s, '.') != NULL;
            return 1;
        }
        default:
            return 0;
    }
}

static Value jp_concat(Value l, Value r) {
    const char *ls = jp_to_text(l);
    const char *rs = jp_to_text(r);
    size_t n = strlen(ls) + strlen(rs) + 1;
    char *out = malloc(n);
    snprintf(out, n, "%s%s", ls, rs);
    return jp_str(out);
}

static Value jp_add(Value l, Value r) {
    int64_t li, ri;
    if (jp_int_like(l, &li) && jp_int_like(r, &ri)) {
        return jp_int(li + ri);
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        if (fa || fb) {
            return jp_float(a + b);
        }
        return jp_int((int64_t)(a + b));
    }
    return jp_concat(l, r);
}

static Value jp_sub(Value l, Value r) {
    int64_t li, ri;
    if (jp_int_like(l, &li) && jp_int_like(r, &ri)) {
        return jp_int(li - ri);
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        if (fa || fb) {
            return jp_float(a - b);
        }
        return jp_int((int64_t)(a - b));
    }
    printf("%s\n", JP_MSG_BAD_OPERANDS);
    return jp_int(0);
}

static Value jp_mul(Value l, Value r) {
    int64_t li, ri;
    if (jp_int_like(l, &li) && jp_int_like(r, &ri)) {
        return jp_int(li * ri);
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        if (fa || fb) {
            return jp_float(a * b);
        }
        return jp_int((int64_t)(a * b));
    }
    printf("%s\n", JP_MSG_BAD_OPERANDS);
    return jp_int(0);
}

static Value jp_div(Value l, Value r) {
    int64_t li, ri;
    if (jp_int_like(l, &li) && jp_int_like(r, &ri)) {
        if (ri == 0) {
            printf("%s\n", JP_MSG_DIV_ZERO);
            return jp_int(0);
        }
        return jp_int(li / ri);
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        if (b == 0) {
            printf("%s\n", JP_MSG_DIV_ZERO);
            return jp_int(0);
        }
        return jp_float(a / b);
    }
    printf("%s\n", JP_MSG_BAD_OPERANDS);
    return jp_int(0);
}

static Value jp_mod(Value l, Value r) {
    int64_t li, ri;
    if (jp_int_like(l, &li) && jp_int_like(r, &ri)) {
        if (ri == 0) {
            printf("%s\n", JP_MSG_MOD_ZERO);
            return jp_int(0);
        }
        return jp_int(li % ri);
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        if (b == 0) {
            printf("%s\n", JP_MSG_MOD_ZERO);
            return jp_int(0);
        }
        return jp_float(fmod(a, b));
    }
    printf("%s\n", JP_MSG_BAD_OPERANDS);
    return jp_int(0);
}

static Value jp_neg(Value v) {
    if (v.tag == VAL_INT || v.tag == VAL_BOOL) {
        return jp_int(-v.i);
    }
    if (v.tag == VAL_FLOAT) {
        return jp_float(-v.f);
    }
    printf("%s\n", JP_MSG_BAD_OPERANDS);
    return jp_int(0);
}

static int jp_equals(Value l, Value r) {
    if (l.tag == VAL_STR && r.tag == VAL_STR) {
        return strcmp(l.s ? l.s : "", r.s ? r.s : "") == 0;
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        return a == b;
    }
    if (l.tag == VAL_NULL && r.tag == VAL_NULL) {
        return 1;
    }
    if ((l.tag == VAL_LIST && r.tag == VAL_LIST) || (l.tag == VAL_OBJ && r.tag == VAL_OBJ)) {
        return l.h == r.h;
    }
    return 0;
}

static int jp_less(Value l, Value r) {
    if (l.tag == VAL_STR && r.tag == VAL_STR) {
        return strcmp(l.s ? l.s : "", r.s ? r.s : "") < 0;
    }
    double a, b;
    int fa, fb;
    if (jp_numeric(l, &a, &fa) && jp_numeric(r, &b, &fb)) {
        return a < b;
    }
    printf("%s\n", JP_MSG_BAD_OPERANDS);
    return 0;
}

"#;

pub const C_BUILTINS: &str = r#"static Value jp_print(Value v) {
    printf("%s\n", jp_to_text(v));
    return jp_null();
}

static Value jp_input(void) {
    char buffer[1024];
    if (fgets(buffer, sizeof buffer, stdin) == NULL) {
        return jp_str("");
    }
    size_t n = strlen(buffer);
    if (n > 0 && buffer[n - 1] == '\n') {
        buffer[n - 1] = '\0';
    }
    return jp_str(jp_strdup(buffer));
}

static Value jp_to_int_value(Value v) {
    switch (v.tag) {
        case VAL_INT: return v;
        case VAL_BOOL: return jp_int(v.i);
        case VAL_FLOAT: return jp_int((int64_t)v.f);
        case VAL_STR: {
            if (v.s == NULL) {
                return jp_int(0);
            }
            char *end = NULL;
            long long parsed = strtoll(v.s, &end, 10);
            if (end == NULL || *end != '\0' || end == v.s) {
                return jp_int(0);
            }
            return jp_int((int64_t)parsed);
        }
        default: return jp_int(0);
    }
}

static Value jp_to_float_value(Value v) {
    switch (v.tag) {
        case VAL_FLOAT: return v;
        case VAL_INT:
        case VAL_BOOL: return jp_float((double)v.i);
        case VAL_STR: {
            if (v.s == NULL) {
                return jp_float(0);
            }
            char *end = NULL;
            double parsed = strtod(v.s, &end);
            if (end == NULL || *end != '\0' || end == v.s) {
                return jp_float(0);
            }
            return jp_float(parsed);
        }
        default: return jp_float(0);
    }
}

"#;

pub const C_NATIVE_SUPPORT: &str = r#"static void *jp_resolve_symbol(void *handle, const char *name) {
#ifdef _WIN32
    return (void *)GetProcAddress((HMODULE)handle, name);
#else
    return dlsym(handle, name);
#endif
}

static void *jp_open_library(const char *path) {
#ifdef _WIN32
    return (void *)LoadLibraryA(path);
#else
    return dlopen(path, RTLD_NOW);
#endif
}

"#;

pub const C_OPCODES: &str = r#"enum {
    OP_LOAD_CONST,
    OP_PUSH_NULL,
    OP_LOAD_VAR,
    OP_STORE_VAR,
    OP_ADD,
    OP_SUB,
    OP_MUL,
    OP_DIV,
    OP_MOD,
    OP_NEG,
    OP_NOT,
    OP_AND,
    OP_OR,
    OP_CMP_EQ,
    OP_CMP_NE,
    OP_CMP_LT,
    OP_CMP_LE,
    OP_CMP_GT,
    OP_CMP_GE,
    OP_JUMP,
    OP_JUMP_IF_FALSE,
    OP_CALL,
    OP_CALL_NATIVE,
    OP_CALL_METHOD,
    OP_NEW_OBJECT,
    OP_RETURN,
    OP_RETURN_VALUE,
    OP_GET_MEMBER,
    OP_SET_MEMBER,
    OP_NEW_LIST,
    OP_INDEX_GET,
    OP_INDEX_SET,
    OP_LIST_LEN,
    OP_LIST_APPEND,
    OP_LIST_REMOVE,
    OP_PRINT,
    OP_INPUT,
    OP_TO_INT,
    OP_TO_FLOAT,
    OP_TO_TEXT,
    OP_TO_BOOL,
    OP_TYPE_NAME,
    OP_POP,
    OP_HALT
};

typedef struct {
    int32_t op;
    int32_t a;
    int32_t b;
} JpInstr;

typedef struct {
    int32_t addr;
    int32_t params;
} JpMethodSlot;

"#;

/// Interpreter loop: instruction pointer, switch dispatch, explicit
/// evaluation stack and a frame stack of return addresses.
pub const C_INTERPRETER: &str = r#"static Value jp_vars[JP_VAR_COUNT];
static Value jp_stack[JP_STACK_MAX];
static int jp_sp = 0;
static int32_t jp_frames[JP_FRAMES_MAX];
static int jp_fp = 0;

static void jp_push(Value v) {
    if (jp_sp >= JP_STACK_MAX) {
        fprintf(stderr, "%s\n", JP_MSG_STACK_OVERFLOW);
        exit(1);
    }
    jp_stack[jp_sp++] = v;
}

static Value jp_pop(void) {
    if (jp_sp <= 0) {
        return jp_null();
    }
    return jp_stack[--jp_sp];
}

static void jp_discard(int count) {
    while (count-- > 0) {
        (void)jp_pop();
    }
}

static void jp_run(void) {
    int32_t ip = 0;
    Value args[64];
    for (;;) {
        JpInstr in = jp_code[ip++];
        switch (in.op) {
        case OP_LOAD_CONST: jp_push(jp_consts[in.a]); break;
        case OP_PUSH_NULL: jp_push(jp_null()); break;
        case OP_LOAD_VAR: jp_push(jp_vars[in.a]); break;
        case OP_STORE_VAR: jp_vars[in.a] = jp_pop(); break;
        case OP_ADD: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_add(l, r)); break; }
        case OP_SUB: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_sub(l, r)); break; }
        case OP_MUL: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_mul(l, r)); break; }
        case OP_DIV: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_div(l, r)); break; }
        case OP_MOD: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_mod(l, r)); break; }
        case OP_NEG: jp_push(jp_neg(jp_pop())); break;
        case OP_NOT: jp_push(jp_bool(!jp_truthy(jp_pop()))); break;
        case OP_AND: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(jp_truthy(l) && jp_truthy(r))); break; }
        case OP_OR: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(jp_truthy(l) || jp_truthy(r))); break; }
        case OP_CMP_EQ: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(jp_equals(l, r))); break; }
        case OP_CMP_NE: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(!jp_equals(l, r))); break; }
        case OP_CMP_LT: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(jp_less(l, r))); break; }
        case OP_CMP_LE: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(!jp_less(r, l))); break; }
        case OP_CMP_GT: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(jp_less(r, l))); break; }
        case OP_CMP_GE: { Value r = jp_pop(); Value l = jp_pop(); jp_push(jp_bool(!jp_less(l, r))); break; }
        case OP_JUMP: ip = in.a; break;
        case OP_JUMP_IF_FALSE: if (!jp_truthy(jp_pop())) { ip = in.a; } break;
        case OP_CALL:
            if (jp_fp >= JP_FRAMES_MAX) {
                fprintf(stderr, "%s\n", JP_MSG_FRAME_OVERFLOW);
                exit(1);
            }
            jp_frames[jp_fp++] = ip;
            ip = in.a;
            break;
        case OP_CALL_NATIVE: {
            int argc = in.b;
            for (int i = argc - 1; i >= 0; --i) {
                args[i] = jp_pop();
            }
            jp_push(jp_natives[in.a](args, argc));
            break;
        }
        case OP_CALL_METHOD: {
            int argc = in.b;
            Value receiver = jp_sp > argc ? jp_stack[jp_sp - 1 - argc] : jp_null();
            if (receiver.tag != VAL_OBJ) {
                printf("%s\n", JP_MSG_NOT_AN_OBJECT);
                jp_discard(argc + 1);
                jp_push(jp_null());
                break;
            }
            JpMethodSlot slot = jp_dispatch[jp_objects[receiver.h].class_id][in.a];
            if (slot.addr < 0) {
                printf("%s\n", JP_MSG_UNKNOWN_METHOD);
                jp_discard(argc + 1);
                jp_push(jp_null());
                break;
            }
            if (slot.params != argc) {
                printf("%s\n", JP_MSG_ARITY);
                jp_discard(argc + 1);
                jp_push(jp_null());
                break;
            }
            if (jp_fp >= JP_FRAMES_MAX) {
                fprintf(stderr, "%s\n", JP_MSG_FRAME_OVERFLOW);
                exit(1);
            }
            jp_frames[jp_fp++] = ip;
            ip = slot.addr;
            break;
        }
        case OP_NEW_OBJECT: {
            if (jp_object_count >= JP_OBJECTS_MAX) {
                printf("%s\n", JP_MSG_OBJECT_LIMIT);
                jp_push(jp_null());
                break;
            }
            int h = jp_object_count++;
            jp_objects[h].class_id = in.a;
            for (int i = 0; i < JP_MEMBER_COUNT; ++i) {
                jp_objects[h].members[i] = jp_null();
            }
            jp_push(jp_obj_handle(h));
            break;
        }
        case OP_RETURN:
            jp_push(jp_null());
            if (jp_fp == 0) {
                return;
            }
            ip = jp_frames[--jp_fp];
            break;
        case OP_RETURN_VALUE:
            if (jp_fp == 0) {
                return;
            }
            ip = jp_frames[--jp_fp];
            break;
        case OP_GET_MEMBER: {
            Value obj = jp_pop();
            if (obj.tag != VAL_OBJ) {
                printf("%s\n", JP_MSG_NOT_AN_OBJECT);
                jp_push(jp_null());
                break;
            }
            jp_push(jp_objects[obj.h].members[in.a]);
            break;
        }
        case OP_SET_MEMBER: {
            Value v = jp_pop();
            Value obj = jp_pop();
            if (obj.tag != VAL_OBJ) {
                printf("%s\n", JP_MSG_NOT_AN_OBJECT);
                break;
            }
            jp_objects[obj.h].members[in.a] = v;
            break;
        }
        case OP_NEW_LIST: {
            int n = in.a;
            if (jp_list_count >= JP_LISTS_MAX) {
                printf("%s\n", JP_MSG_LIST_LIMIT);
                jp_discard(n);
                jp_push(jp_null());
                break;
            }
            int h = jp_list_count++;
            JpList *list = &jp_lists[h];
            list->len = n > JP_LIST_CAP ? JP_LIST_CAP : n;
            for (int i = n - 1; i >= 0; --i) {
                Value item = jp_pop();
                if (i < list->len) {
                    list->items[i] = item;
                }
            }
            jp_push(jp_list_handle(h));
            break;
        }
        case OP_INDEX_GET: {
            Value idx = jp_pop();
            Value target = jp_pop();
            if (target.tag != VAL_LIST) {
                printf("%s\n", JP_MSG_NOT_A_LIST);
                jp_push(jp_null());
                break;
            }
            int64_t i = jp_to_int_value(idx).i;
            JpList *list = &jp_lists[target.h];
            if (i < 0 || i >= list->len) {
                printf("%s\n", JP_MSG_INDEX_OOB);
                jp_push(jp_null());
                break;
            }
            jp_push(list->items[i]);
            break;
        }
        case OP_INDEX_SET: {
            Value v = jp_pop();
            Value idx = jp_pop();
            Value target = jp_pop();
            if (target.tag != VAL_LIST) {
                printf("%s\n", JP_MSG_NOT_A_LIST);
                break;
            }
            int64_t i = jp_to_int_value(idx).i;
            JpList *list = &jp_lists[target.h];
            if (i < 0 || i >= list->len) {
                printf("%s\n", JP_MSG_INDEX_OOB);
                break;
            }
            list->items[i] = v;
            break;
        }
        case OP_LIST_LEN: {
            Value t = jp_pop();
            if (t.tag == VAL_LIST) {
                jp_push(jp_int(jp_lists[t.h].len));
            } else if (t.tag == VAL_STR) {
                jp_push(jp_int((int64_t)strlen(t.s ? t.s : "")));
            } else {
                printf("%s\n", JP_MSG_NOT_A_LIST);
                jp_push(jp_int(0));
            }
            break;
        }
        case OP_LIST_APPEND: {
            Value v = jp_pop();
            Value t = jp_pop();
            if (t.tag != VAL_LIST) {
                printf("%s\n", JP_MSG_NOT_A_LIST);
                jp_push(jp_null());
                break;
            }
            JpList *list = &jp_lists[t.h];
            if (list->len >= JP_LIST_CAP) {
                printf("%s\n", JP_MSG_LIST_LIMIT);
            } else {
                list->items[list->len++] = v;
            }
            jp_push(jp_null());
            break;
        }
        case OP_LIST_REMOVE: {
            Value idx = jp_pop();
            Value t = jp_pop();
            if (t.tag != VAL_LIST) {
                printf("%s\n", JP_MSG_NOT_A_LIST);
                jp_push(jp_null());
                break;
            }
            int64_t i = jp_to_int_value(idx).i;
            JpList *list = &jp_lists[t.h];
            if (i < 0 || i >= list->len) {
                printf("%s\n", JP_MSG_INDEX_OOB);
                jp_push(jp_null());
                break;
            }
            Value removed = list->items[i];
            for (int j = (int)i; j + 1 < list->len; ++j) {
                list->items[j] = list->items[j + 1];
            }
            list->len -= 1;
            jp_push(removed);
            break;
        }
        case OP_PRINT: jp_push(jp_print(jp_pop())); break;
        case OP_INPUT: jp_push(jp_input()); break;
        case OP_TO_INT: jp_push(jp_to_int_value(jp_pop())); break;
        case OP_TO_FLOAT: jp_push(jp_to_float_value(jp_pop())); break;
        case OP_TO_TEXT: jp_push(jp_str(jp_to_text(jp_pop()))); break;
        case OP_TO_BOOL: jp_push(jp_bool(jp_truthy(jp_pop()))); break;
        case OP_TYPE_NAME: jp_push(jp_str(jp_type_name(jp_pop()))); break;
        case OP_POP: (void)jp_pop(); break;
        case OP_HALT: return;
        default: return;
        }
    }
}

int main(void) {
    jp_load_natives();
    jp_run();
    return 0;
}
"#;

pub fn escape_c_string(value: &str) -> String {
    let mut escaped = String::new();
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn write_temp_file(contents: &str, suffix: &str) -> Result<(PathBuf, PathBuf)> {
    let mut dir = std::env::temp_dir();
    dir.push("jplang");
    fs::create_dir_all(&dir).context("Creating temp directory")?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let file_stem = format!("programa_{nanos}");
    let source_path = dir.join(format!("{file_stem}.c"));
    let binary_path = dir.join(format!("{file_stem}{suffix}"));

    fs::write(&source_path, contents).context("Writing C source")?;
    Ok((source_path, binary_path))
}

pub fn compile_source(
    source: &str,
    suffix: &str,
    compile_error: &str,
) -> Result<(PathBuf, PathBuf)> {
    let (source_path, binary_path) = write_temp_file(source, suffix)?;
    compile_file(&source_path, &binary_path, &[], compile_error)?;
    Ok((source_path, binary_path))
}

pub fn compile_file(
    source_path: &Path,
    binary_path: &Path,
    extra_args: &[&str],
    compile_error: &str,
) -> Result<()> {
    let compile = Command::new("cc")
        .arg(source_path)
        .arg("-std=c99")
        .arg("-O2")
        .arg("-o")
        .arg(binary_path)
        .arg("-lm")
        .arg("-ldl")
        .args(extra_args)
        .output()
        .context("Running C compiler")?;
    if !compile.status.success() {
        let stderr = String::from_utf8_lossy(&compile.stderr);
        bail!("{compile_error}: {stderr}");
    }
    Ok(())
}

pub fn run_compiled_binary(binary_path: &Path, run_error: &str) -> Result<String> {
    let output = Command::new(binary_path)
        .output()
        .context("Running compiled program")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{run_error}: {stderr}");
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// True when a C toolchain is reachable; tests that execute generated
/// programs skip (with a notice) when it is not.
pub fn have_cc() -> bool {
    Command::new("cc")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}
