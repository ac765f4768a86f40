//! Backend module - lowering to the native representation

pub mod abi;
pub mod codegen;
mod expr;
pub mod registry;

pub use abi::{CApi, ObjectAbi};
pub use codegen::{CodeGenerator, Dispatch, LoweredProgram};
