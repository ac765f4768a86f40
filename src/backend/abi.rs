//! Object ABI boundary
//!
//! The code generator never touches reference-count fields or object
//! internals directly; every boxed operation goes through a symbol obtained
//! from this trait. The default implementation names the C-API-compatible
//! symbols the external runtime exports. Tests substitute a counting
//! instrument to audit the generator's reference-count discipline.
#![allow(dead_code)]

/// Names of the external symbols the generated code may reference.
///
/// Conventions mirror the C extension ABI: constructors and accessors
/// return a *new* reference unless noted; arguments are borrowed.
pub trait ObjectAbi {
    // ---- reference counting ----
    fn incref(&self) -> &'static str {
        "Py_INCREF"
    }
    fn decref(&self) -> &'static str {
        "Py_DECREF"
    }
    /// Null-safe decrement
    fn xdecref(&self) -> &'static str {
        "Py_XDECREF"
    }

    // ---- memory policy ----
    fn alloc(&self) -> &'static str {
        "PyMem_Malloc"
    }
    fn dealloc(&self) -> &'static str {
        "PyMem_Free"
    }

    // ---- boxed constructors ----
    fn from_int(&self) -> &'static str {
        "PyLong_FromLongLong"
    }
    fn from_float(&self) -> &'static str {
        "PyFloat_FromDouble"
    }
    fn from_bool(&self) -> &'static str {
        "PyBool_FromLong"
    }
    fn from_str(&self) -> &'static str {
        "PyUnicode_FromString"
    }
    fn from_bytes(&self) -> &'static str {
        "PyBytes_FromStringAndSize"
    }
    fn none_object(&self) -> &'static str {
        "Py_None"
    }

    // ---- native extraction ----
    fn as_int(&self) -> &'static str {
        "PyLong_AsLongLong"
    }
    fn as_float(&self) -> &'static str {
        "PyFloat_AsDouble"
    }

    // ---- containers ----
    fn list_new(&self) -> &'static str {
        "PyList_New"
    }
    fn list_append(&self) -> &'static str {
        "PyList_Append"
    }
    fn tuple_new(&self) -> &'static str {
        "PyTuple_New"
    }
    /// Steals the item reference
    fn tuple_set_item(&self) -> &'static str {
        "PyTuple_SetItem"
    }
    fn dict_new(&self) -> &'static str {
        "PyDict_New"
    }
    fn dict_set_item(&self) -> &'static str {
        "PyDict_SetItem"
    }
    fn set_new(&self) -> &'static str {
        "PySet_New"
    }
    fn set_add(&self) -> &'static str {
        "PySet_Add"
    }
    /// Position access on any sequence, new reference
    fn seq_get_item(&self) -> &'static str {
        "PySequence_GetItem"
    }
    fn seq_contains(&self) -> &'static str {
        "PySequence_Contains"
    }
    fn object_get_item(&self) -> &'static str {
        "PyObject_GetItem"
    }
    fn object_set_item(&self) -> &'static str {
        "PyObject_SetItem"
    }
    fn object_length(&self) -> &'static str {
        "PyObject_Length"
    }

    // ---- generic dynamic dispatch ----
    fn getattr(&self) -> &'static str {
        "PyObject_GetAttrString"
    }
    fn setattr(&self) -> &'static str {
        "PyObject_SetAttrString"
    }
    fn call_method(&self) -> &'static str {
        "PyObject_CallMethod"
    }
    fn call_object(&self) -> &'static str {
        "PyObject_CallObject"
    }

    // ---- protocol operations ----
    fn is_true(&self) -> &'static str {
        "PyObject_IsTrue"
    }
    fn rich_compare(&self) -> &'static str {
        "PyObject_RichCompareBool"
    }
    fn number_op(&self, op: NumberOp) -> &'static str {
        match op {
            NumberOp::Add => "PyNumber_Add",
            NumberOp::Sub => "PyNumber_Subtract",
            NumberOp::Mult => "PyNumber_Multiply",
            NumberOp::Div => "PyNumber_TrueDivide",
            NumberOp::FloorDiv => "PyNumber_FloorDivide",
            NumberOp::Mod => "PyNumber_Remainder",
            NumberOp::Pow => "PyNumber_Power",
            NumberOp::MatMult => "PyNumber_MatrixMultiply",
            NumberOp::LShift => "PyNumber_Lshift",
            NumberOp::RShift => "PyNumber_Rshift",
            NumberOp::BitOr => "PyNumber_Or",
            NumberOp::BitXor => "PyNumber_Xor",
            NumberOp::BitAnd => "PyNumber_And",
            NumberOp::Neg => "PyNumber_Negative",
            NumberOp::Pos => "PyNumber_Positive",
            NumberOp::Invert => "PyNumber_Invert",
        }
    }

    fn number_abs(&self) -> &'static str {
        "PyNumber_Absolute"
    }

    // ---- conversion and formatting ----
    fn repr(&self) -> &'static str {
        "PyObject_Repr"
    }
    fn str_of(&self) -> &'static str {
        "PyObject_Str"
    }
    fn ascii_of(&self) -> &'static str {
        "PyObject_ASCII"
    }
    fn format(&self) -> &'static str {
        "PyObject_Format"
    }
    fn print_object(&self) -> &'static str {
        "PyObject_Print"
    }

    // ---- argument bundles and exceptions ----
    /// Extracts typed values from a boxed argument bundle against a format
    /// string; its failure is distinct from a wrong-arity bundle.
    fn arg_parse(&self) -> &'static str {
        "PyArg_ParseTuple"
    }
    fn set_error(&self) -> &'static str {
        "PyErr_SetString"
    }
    /// Exception kind object for a Python exception class name
    fn exception_kind(&self, name: &str) -> &'static str {
        match name {
            "ValueError" => "PyExc_ValueError",
            "TypeError" => "PyExc_TypeError",
            "KeyError" => "PyExc_KeyError",
            "IndexError" => "PyExc_IndexError",
            "ZeroDivisionError" => "PyExc_ZeroDivisionError",
            "AssertionError" => "PyExc_AssertionError",
            "NotImplementedError" => "PyExc_NotImplementedError",
            _ => "PyExc_RuntimeError",
        }
    }

    /// Comparison opid constant for `rich_compare`
    fn compare_opid(&self, op: CompareId) -> &'static str {
        match op {
            CompareId::Lt => "Py_LT",
            CompareId::Le => "Py_LE",
            CompareId::Eq => "Py_EQ",
            CompareId::Ne => "Py_NE",
            CompareId::Gt => "Py_GT",
            CompareId::Ge => "Py_GE",
        }
    }
}

/// Boxed numeric protocol entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    MatMult,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    Neg,
    Pos,
    Invert,
}

/// Comparison ids understood by the rich-compare entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareId {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

/// The C-API-compatible ABI the external runtime implements
#[derive(Debug, Default, Clone, Copy)]
pub struct CApi;

impl ObjectAbi for CApi {}

/// Test instrument: delegates to [`CApi`] while counting how many
/// reference-count operations the generator emits.
#[cfg(test)]
pub struct CountingAbi {
    inner: CApi,
    pub increfs: std::cell::Cell<usize>,
    pub decrefs: std::cell::Cell<usize>,
}

#[cfg(test)]
impl CountingAbi {
    pub fn new() -> Self {
        Self {
            inner: CApi,
            increfs: std::cell::Cell::new(0),
            decrefs: std::cell::Cell::new(0),
        }
    }
}

#[cfg(test)]
impl ObjectAbi for CountingAbi {
    fn incref(&self) -> &'static str {
        self.increfs.set(self.increfs.get() + 1);
        self.inner.incref()
    }

    fn decref(&self) -> &'static str {
        self.decrefs.set(self.decrefs.get() + 1);
        self.inner.decref()
    }

    fn xdecref(&self) -> &'static str {
        self.decrefs.set(self.decrefs.get() + 1);
        self.inner.xdecref()
    }
}
