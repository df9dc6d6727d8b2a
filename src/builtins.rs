//! Builtin functions and named constants.
//!
//! Both tables are laid out once and shared by three parties that must agree on positions:
//! the checker types them, the compiler places them in frames 0 and 1 of its compile-time
//! environment, and the VM allocates the matching builtin and constant frames on its heap.
//!
//! ## Builtins
//!
//! A builtin receives its evaluated arguments as native [`Value`]s. Whatever it computes is
//! observable only through side effects: the VM discards the callback's result and pushes the
//! address of the first argument back (or `undefined`), which is why the checker gives every
//! builtin application the type of its first argument.
//!
//! ```text
//! display(x);   // prints x, evaluates to x
//! ```
//!
//! Hosts replace implementations by name with [`Builtins::with_overrides`]; names that do not
//! appear in the registry are ignored.

use crate::Error;
use crate::ast::{Type, Value};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Signature of a host-supplied builtin implementation
pub type BuiltinFn = dyn Fn(&[Value]) -> Result<(), Error> + Send + Sync;

/// Definition of a builtin function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinOp {
    /// Identifier used in source programs
    pub name: &'static str,
    /// Position in the builtins frame, stored in `Builtin` heap nodes
    pub id: u8,
    pub arity: usize,
}

impl BuiltinOp {
    pub fn ty(&self) -> Type {
        Type::Builtin { arity: self.arity }
    }
}

/// A named constant living in frame 1
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: &'static str,
    pub value: Value,
    pub ty: Type,
}

static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    vec![BuiltinOp {
        name: "display",
        id: 0,
        arity: 1,
    }]
});

static CONSTANTS: LazyLock<Vec<Constant>> = LazyLock::new(|| {
    vec![
        Constant {
            name: "I32_MAX",
            value: Value::from(i32::MAX),
            ty: Type::I32,
        },
        Constant {
            name: "I32_MIN",
            value: Value::from(i32::MIN),
            ty: Type::I32,
        },
    ]
});

/// Builtins in frame order
pub(crate) fn builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Constants in frame order
pub(crate) fn constants() -> &'static [Constant] {
    CONSTANTS.as_slice()
}

fn builtin_display(args: &[Value]) -> Result<(), Error> {
    for arg in args {
        println!("{arg}");
    }
    Ok(())
}

/// Default implementation of every registered builtin, by id
fn default_implementation(op: &BuiltinOp) -> Arc<BuiltinFn> {
    match op.name {
        "display" => Arc::new(builtin_display),
        _ => {
            let name = op.name;
            Arc::new(move |_: &[Value]| {
                Err::<(), Error>(Error::Internal(format!(
                    "builtin {name} has no implementation"
                )))
            })
        }
    }
}

/// The callable side of the builtin registry, indexed by builtin id.
#[derive(Clone)]
pub struct Builtins {
    implementations: Vec<Arc<BuiltinFn>>,
}

impl std::fmt::Debug for Builtins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtins")
            .field("count", &self.implementations.len())
            .finish()
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Builtins::with_overrides(&HashMap::new())
    }
}

impl Builtins {
    /// Default implementations with the given ones substituted by name
    pub fn with_overrides(overrides: &HashMap<String, Arc<BuiltinFn>>) -> Self {
        let implementations = builtin_ops()
            .iter()
            .map(|op| match overrides.get(op.name) {
                Some(custom) => {
                    debug!(builtin = op.name, "using host implementation");
                    Arc::clone(custom)
                }
                None => default_implementation(op),
            })
            .collect();

        Builtins { implementations }
    }

    pub fn call(&self, id: u8, args: &[Value]) -> Result<(), Error> {
        let implementation = self
            .implementations
            .get(usize::from(id))
            .ok_or_else(|| Error::Internal(format!("unknown builtin id {id}")))?;
        implementation(args)
    }
}
