// Item catalog, format rules and the memoized legality/cost resolver.

pub mod format;
pub mod item;
pub mod resolver;

pub use format::{CompiledFormat, CostFormula, CostOverride, CostTier, FormatRules, Validation};
pub use item::{BaseStats, Catalog, CatalogError, CatalogItem, Category};
pub use resolver::FormatResolver;
