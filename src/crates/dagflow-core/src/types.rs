//! Type tags for the value model
//!
//! Every [`Value`](crate::value::Value) carries a [`Type`]. A type is a tag
//! plus, for compound tags, the element type (lists), the key and value types
//! (maps), the ordered field names and types (structs), or the ordered
//! parameter names and types plus a return type (functions).
//!
//! The engine performs no type inference. It only re-checks the
//! edge/arg-name/type contract at init and commit time using
//! [`Type::compat`], which accepts the [`Type::Variant`] wildcard in either
//! direction.

use serde::Serialize;
use std::fmt;

/// A value type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    /// Boolean
    Bool,
    /// Signed 64-bit integer
    Int,
    /// 64-bit float
    Float,
    /// String
    Str,
    /// Ordered list with a single element type
    List(Box<Type>),
    /// Map with hashable keys; key order is not significant
    Map(Box<Type>, Box<Type>),
    /// Ordered sequence of named, typed fields
    Struct(StructType),
    /// First-class function signature
    Func(FuncType),
    /// Wildcard accepted on either side of a compatibility check
    Variant,
}

/// Ordered field names and types of a struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StructType {
    /// Fields in declaration order
    pub fields: Vec<(String, Type)>,
}

/// Ordered parameter names and types plus the return type of a function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FuncType {
    /// Parameters in declaration order
    pub params: Vec<(String, Type)>,
    /// Return type
    pub ret: Box<Type>,
}

impl StructType {
    /// Create a struct type from ordered fields.
    pub fn new(fields: Vec<(String, Type)>) -> Self {
        Self { fields }
    }

    /// Look up a field type by name.
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

impl FuncType {
    /// Create a function type from ordered parameters and a return type.
    pub fn new(params: Vec<(String, Type)>, ret: Type) -> Self {
        Self {
            params,
            ret: Box::new(ret),
        }
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Look up a parameter type by name.
    pub fn param(&self, name: &str) -> Option<&Type> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    /// The struct type of this function's input snapshot: one field per
    /// parameter, in parameter order.
    pub fn args_struct(&self) -> StructType {
        StructType::new(self.params.clone())
    }
}

impl Type {
    /// Shorthand for a list type.
    pub fn list(elem: Type) -> Self {
        Self::List(Box::new(elem))
    }

    /// Shorthand for a map type.
    pub fn map(key: Type, val: Type) -> Self {
        Self::Map(Box::new(key), Box::new(val))
    }

    /// Compatibility check used by static validation.
    ///
    /// Two types are compatible when they are structurally equal, or when
    /// either side (at any depth) is [`Type::Variant`].
    pub fn compat(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Variant, _) | (_, Type::Variant) => true,
            (Type::List(a), Type::List(b)) => a.compat(b),
            (Type::Map(ka, va), Type::Map(kb, vb)) => ka.compat(kb) && va.compat(vb),
            (Type::Struct(a), Type::Struct(b)) => {
                a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .zip(&b.fields)
                        .all(|((na, ta), (nb, tb))| na == nb && ta.compat(tb))
            }
            (Type::Func(a), Type::Func(b)) => {
                a.params.len() == b.params.len()
                    && a.ret.compat(&b.ret)
                    && a.params
                        .iter()
                        .zip(&b.params)
                        .all(|((na, ta), (nb, tb))| na == nb && ta.compat(tb))
            }
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "str"),
            Type::List(t) => write!(f, "[]{}", t),
            Type::Map(k, v) => write!(f, "map{{{}: {}}}", k, v),
            Type::Struct(s) => {
                write!(f, "struct{{")?;
                for (i, (name, t)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} {}", name, t)?;
                }
                write!(f, "}}")
            }
            Type::Func(sig) => {
                write!(f, "func(")?;
                for (i, (name, t)) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", name, t)?;
                }
                write!(f, ") {}", sig.ret)
            }
            Type::Variant => write!(f, "variant"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_syntax() {
        assert_eq!(Type::list(Type::Int).to_string(), "[]int");
        assert_eq!(Type::map(Type::Str, Type::Bool).to_string(), "map{str: bool}");

        let s = Type::Struct(StructType::new(vec![
            ("a".to_string(), Type::Int),
            ("b".to_string(), Type::Str),
        ]));
        assert_eq!(s.to_string(), "struct{a int; b str}");

        let sig = Type::Func(FuncType::new(
            vec![("a".to_string(), Type::Int)],
            Type::Str,
        ));
        assert_eq!(sig.to_string(), "func(a int) str");
    }

    #[test]
    fn test_variant_compat_both_directions() {
        assert!(Type::Variant.compat(&Type::Int));
        assert!(Type::Int.compat(&Type::Variant));
        assert!(Type::list(Type::Variant).compat(&Type::list(Type::Str)));
        assert!(!Type::Int.compat(&Type::Str));
    }

    #[test]
    fn test_struct_compat_is_ordered() {
        let ab = Type::Struct(StructType::new(vec![
            ("a".to_string(), Type::Int),
            ("b".to_string(), Type::Str),
        ]));
        let ba = Type::Struct(StructType::new(vec![
            ("b".to_string(), Type::Str),
            ("a".to_string(), Type::Int),
        ]));
        assert!(!ab.compat(&ba));
        assert!(ab.compat(&ab));
    }

    #[test]
    fn test_args_struct_preserves_param_order() {
        let sig = FuncType::new(
            vec![
                ("x".to_string(), Type::Int),
                ("y".to_string(), Type::Int),
            ],
            Type::Int,
        );
        let args = sig.args_struct();
        assert_eq!(args.fields[0].0, "x");
        assert_eq!(args.fields[1].0, "y");
    }
}
