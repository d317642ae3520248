//! ORDER BY clauses.

use tabula_core::PropertyMapping;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// One (field, direction) ordering pair.
#[derive(Debug, Clone)]
pub struct Order {
    pub mapping: &'static PropertyMapping,
    pub direction: OrderDirection,
}

impl Order {
    pub fn asc(mapping: &'static PropertyMapping) -> Self {
        Self {
            mapping,
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(mapping: &'static PropertyMapping) -> Self {
        Self {
            mapping,
            direction: OrderDirection::Desc,
        }
    }
}
