//! Built-in container method registry
//!
//! Maps str/list/dict method names to the native runtime entry points they
//! lower to, keyed by the receiver's statically known type. Anything not in
//! this table falls back to the Object ABI's generic method-call path.
#![allow(dead_code)]

/// Statically known receiver kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    Str,
    List,
    Dict,
}

/// What a native method call produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetKind {
    /// New boxed reference
    Object,
    /// Native integer
    Int,
    /// Native boolean
    Bool,
    /// Nothing (statement methods like `append`)
    Void,
}

/// Metadata for one native container method
#[derive(Debug, Clone, Copy)]
pub struct MethodInfo {
    pub name: &'static str,
    pub receiver: Receiver,
    /// Native runtime symbol; receiver is the first argument, all further
    /// arguments are boxed
    pub symbol: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub ret: RetKind,
}

const fn m(
    name: &'static str,
    receiver: Receiver,
    symbol: &'static str,
    min_args: usize,
    max_args: usize,
    ret: RetKind,
) -> MethodInfo {
    MethodInfo {
        name,
        receiver,
        symbol,
        min_args,
        max_args,
        ret,
    }
}

/// The full table, one row per (receiver, name) pair
pub static METHODS: &[MethodInfo] = &[
    // String methods
    m("upper", Receiver::Str, "pyrt_str_upper", 0, 0, RetKind::Object),
    m("lower", Receiver::Str, "pyrt_str_lower", 0, 0, RetKind::Object),
    m("strip", Receiver::Str, "pyrt_str_strip", 0, 0, RetKind::Object),
    m("split", Receiver::Str, "pyrt_str_split", 0, 1, RetKind::Object),
    m("replace", Receiver::Str, "pyrt_str_replace", 2, 2, RetKind::Object),
    m("join", Receiver::Str, "pyrt_str_join", 1, 1, RetKind::Object),
    m("startswith", Receiver::Str, "pyrt_str_startswith", 1, 1, RetKind::Bool),
    m("endswith", Receiver::Str, "pyrt_str_endswith", 1, 1, RetKind::Bool),
    m("find", Receiver::Str, "pyrt_str_find", 1, 1, RetKind::Int),
    m("count", Receiver::Str, "pyrt_str_count", 1, 1, RetKind::Int),
    m("isdigit", Receiver::Str, "pyrt_str_isdigit", 0, 0, RetKind::Bool),
    m("isalpha", Receiver::Str, "pyrt_str_isalpha", 0, 0, RetKind::Bool),
    m("capitalize", Receiver::Str, "pyrt_str_capitalize", 0, 0, RetKind::Object),
    m("title", Receiver::Str, "pyrt_str_title", 0, 0, RetKind::Object),
    // List methods
    m("append", Receiver::List, "pyrt_list_append", 1, 1, RetKind::Void),
    m("pop", Receiver::List, "pyrt_list_pop", 0, 1, RetKind::Object),
    m("extend", Receiver::List, "pyrt_list_extend", 1, 1, RetKind::Void),
    m("remove", Receiver::List, "pyrt_list_remove", 1, 1, RetKind::Void),
    m("insert", Receiver::List, "pyrt_list_insert", 2, 2, RetKind::Void),
    m("reverse", Receiver::List, "pyrt_list_reverse", 0, 0, RetKind::Void),
    m("sort", Receiver::List, "pyrt_list_sort", 0, 0, RetKind::Void),
    m("clear", Receiver::List, "pyrt_list_clear", 0, 0, RetKind::Void),
    m("count", Receiver::List, "pyrt_list_count", 1, 1, RetKind::Int),
    m("index", Receiver::List, "pyrt_list_index", 1, 1, RetKind::Int),
    m("copy", Receiver::List, "pyrt_list_copy", 0, 0, RetKind::Object),
    // Dict methods
    m("keys", Receiver::Dict, "pyrt_dict_keys", 0, 0, RetKind::Object),
    m("values", Receiver::Dict, "pyrt_dict_values", 0, 0, RetKind::Object),
    m("items", Receiver::Dict, "pyrt_dict_items", 0, 0, RetKind::Object),
    m("get", Receiver::Dict, "pyrt_dict_get", 1, 2, RetKind::Object),
    m("pop", Receiver::Dict, "pyrt_dict_pop", 1, 1, RetKind::Object),
    m("update", Receiver::Dict, "pyrt_dict_update", 1, 1, RetKind::Void),
    m("clear", Receiver::Dict, "pyrt_dict_clear", 0, 0, RetKind::Void),
    m("copy", Receiver::Dict, "pyrt_dict_copy", 0, 0, RetKind::Object),
];

/// Look up a method by receiver type and name
pub fn lookup(receiver: Receiver, name: &str) -> Option<&'static MethodInfo> {
    METHODS
        .iter()
        .find(|info| info.receiver == receiver && info.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_keyed_by_receiver() {
        // `count` exists on both str and list with different symbols
        let s = lookup(Receiver::Str, "count").unwrap();
        let l = lookup(Receiver::List, "count").unwrap();
        assert_eq!(s.symbol, "pyrt_str_count");
        assert_eq!(l.symbol, "pyrt_list_count");
    }

    #[test]
    fn test_pop_disambiguates() {
        assert_eq!(lookup(Receiver::List, "pop").unwrap().max_args, 1);
        assert_eq!(lookup(Receiver::Dict, "pop").unwrap().min_args, 1);
    }

    #[test]
    fn test_unknown_method_misses() {
        assert!(lookup(Receiver::Str, "frobnicate").is_none());
        assert!(lookup(Receiver::Dict, "append").is_none());
    }
}
