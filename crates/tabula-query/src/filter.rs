//! Predicate trees over property comparisons.

use tabula_core::{Entity, EntityRef, Instance, PropertyMapping, Value};

/// Comparison operator of a terminal predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Less than (<)
    Less,
    /// Equal (=)
    Equal,
    /// Greater than (>)
    Greater,
    /// Not equal (<>)
    NotEqual,
    /// Less than or equal (<=)
    LessOrEqual,
    /// Greater than or equal (>=)
    GreaterOrEqual,
}

impl Comparison {
    pub const fn as_str(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::Equal => "=",
            Comparison::Greater => ">",
            Comparison::NotEqual => "<>",
            Comparison::LessOrEqual => "<=",
            Comparison::GreaterOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogicalOp::And => "AND",
            LogicalOp::Or => "OR",
        }
    }
}

/// Right-hand side of a terminal predicate.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Value(Value),
    /// An entity instance; its object id is bound in its place
    Instance(Option<Instance>),
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Value(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Value(v.into())
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Value(v.into())
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Value(v.into())
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Value(v.into())
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Value(v.into())
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Value(v.into())
    }
}

impl From<Instance> for FilterValue {
    fn from(v: Instance) -> Self {
        FilterValue::Instance(Some(v))
    }
}

impl<T: Entity> From<&EntityRef<T>> for FilterValue {
    fn from(v: &EntityRef<T>) -> Self {
        FilterValue::Instance(Some(Instance::from_ref(v)))
    }
}

/// A predicate tree.
#[derive(Debug, Clone)]
pub enum Filter {
    Terminal {
        mapping: &'static PropertyMapping,
        comparison: Comparison,
        value: FilterValue,
    },
    Binary {
        lhs: Box<Filter>,
        op: LogicalOp,
        rhs: Box<Filter>,
    },
    /// Negation
    Unary { rhs: Box<Filter> },
}

impl Filter {
    pub fn compare(
        mapping: &'static PropertyMapping,
        comparison: Comparison,
        value: impl Into<FilterValue>,
    ) -> Self {
        Filter::Terminal {
            mapping,
            comparison,
            value: value.into(),
        }
    }

    pub fn eq(mapping: &'static PropertyMapping, value: impl Into<FilterValue>) -> Self {
        Self::compare(mapping, Comparison::Equal, value)
    }

    pub fn ne(mapping: &'static PropertyMapping, value: impl Into<FilterValue>) -> Self {
        Self::compare(mapping, Comparison::NotEqual, value)
    }

    pub fn lt(mapping: &'static PropertyMapping, value: impl Into<FilterValue>) -> Self {
        Self::compare(mapping, Comparison::Less, value)
    }

    pub fn le(mapping: &'static PropertyMapping, value: impl Into<FilterValue>) -> Self {
        Self::compare(mapping, Comparison::LessOrEqual, value)
    }

    pub fn gt(mapping: &'static PropertyMapping, value: impl Into<FilterValue>) -> Self {
        Self::compare(mapping, Comparison::Greater, value)
    }

    pub fn ge(mapping: &'static PropertyMapping, value: impl Into<FilterValue>) -> Self {
        Self::compare(mapping, Comparison::GreaterOrEqual, value)
    }

    pub fn and(self, other: Filter) -> Self {
        Filter::Binary {
            lhs: Box::new(self),
            op: LogicalOp::And,
            rhs: Box::new(other),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        Filter::Binary {
            lhs: Box::new(self),
            op: LogicalOp::Or,
            rhs: Box::new(other),
        }
    }

    pub fn not(self) -> Self {
        Filter::Unary {
            rhs: Box::new(self),
        }
    }
}
