// Format rules: legality and cost of catalog items under a ruleset.
//
// A `FormatRules` is the declarative ruleset as written in formats.toml.
// Compiling it against a catalog produces a `CompiledFormat`: the legal id
// set, a cost lookup, and a content hash used to invalidate memoized results.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::item::{Catalog, CatalogItem, Category};
use crate::draft::model::ItemId;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// One step of a tiered cost table: items whose base stat total is at least
/// `min_total` cost `cost`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTier {
    pub min_total: u32,
    pub cost: u32,
}

/// The format-specific cost calculation, applied before clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostFormula {
    /// `round(base stat total / divisor)`.
    StatTotal { divisor: u32 },
    /// Highest tier whose `min_total` the item reaches; 0 below every tier.
    Tiers { tiers: Vec<CostTier> },
    /// Every item costs the same.
    Flat { cost: u32 },
}

impl CostFormula {
    fn raw_cost(&self, item: &CatalogItem) -> u32 {
        let total = item.stats.total();
        match self {
            CostFormula::StatTotal { divisor } => {
                let divisor = (*divisor).max(1);
                (total + divisor / 2) / divisor
            }
            CostFormula::Tiers { tiers } => tiers
                .iter()
                .filter(|t| total >= t.min_total)
                .max_by_key(|t| t.min_total)
                .map(|t| t.cost)
                .unwrap_or(0),
            CostFormula::Flat { cost } => *cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostOverride {
    pub item_id: ItemId,
    pub cost: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRules {
    pub id: String,
    pub name: String,
    #[serde(default = "default_min_cost")]
    pub min_cost: u32,
    #[serde(default = "default_max_cost")]
    pub max_cost: u32,
    pub cost_formula: CostFormula,
    /// Explicit per-item bans; checked first.
    #[serde(default)]
    pub banlist: Vec<ItemId>,
    /// Allowed-index restriction by id. `None` admits every id.
    #[serde(default)]
    pub allowed_ids: Option<Vec<ItemId>>,
    /// Allowed-index restriction by generation. `None` admits every generation.
    #[serde(default)]
    pub allowed_generations: Option<Vec<u8>>,
    /// Category bans, evaluated in the order written.
    #[serde(default)]
    pub banned_categories: Vec<Category>,
    /// Final-precedence cost overrides.
    #[serde(default)]
    pub cost_overrides: Vec<CostOverride>,
}

fn default_min_cost() -> u32 {
    1
}

fn default_max_cost() -> u32 {
    20
}

impl FormatRules {
    /// SHA-256 over the canonical JSON encoding of the rules.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        // Serialization of plain structs/vecs cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Legality verdict and resolved cost for one item under one format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub legal: bool,
    pub reason: Option<String>,
    pub cost: u32,
}

impl Validation {
    pub fn illegal(reason: impl Into<String>, cost: u32) -> Self {
        Validation {
            legal: false,
            reason: Some(reason.into()),
            cost,
        }
    }
}

/// First failing legality rule, in fixed diagnostic order: ban list, allowed
/// index, then category bans in configured order.
pub fn legality_reason(rules: &FormatRules, item: &CatalogItem) -> Option<String> {
    if rules.banlist.contains(&item.id) {
        return Some("explicitly banned".to_string());
    }

    let outside_ids = rules
        .allowed_ids
        .as_ref()
        .is_some_and(|ids| !ids.contains(&item.id));
    let outside_generations = rules
        .allowed_generations
        .as_ref()
        .is_some_and(|gens| !gens.contains(&item.generation));
    if outside_ids || outside_generations {
        return Some("not in the allowed pokedex".to_string());
    }

    rules
        .banned_categories
        .iter()
        .find(|c| item.has_category(**c))
        .map(|c| format!("{} pokemon are banned", c.label()))
}

/// Formula cost clamped to `[min_cost, max_cost]`, then overridden.
pub fn resolve_cost(rules: &FormatRules, item: &CatalogItem) -> u32 {
    if let Some(o) = rules.cost_overrides.iter().find(|o| o.item_id == item.id) {
        return o.cost;
    }
    let (lo, hi) = if rules.min_cost <= rules.max_cost {
        (rules.min_cost, rules.max_cost)
    } else {
        (rules.max_cost, rules.min_cost)
    };
    rules.cost_formula.raw_cost(item).clamp(lo, hi)
}

/// Pure legality + cost check of a single item.
pub fn validate(item: &CatalogItem, rules: &FormatRules) -> Validation {
    let cost = resolve_cost(rules, item);
    match legality_reason(rules, item) {
        Some(reason) => Validation::illegal(reason, cost),
        None => Validation {
            legal: true,
            reason: None,
            cost,
        },
    }
}

// ---------------------------------------------------------------------------
// Compiled format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompiledFormat {
    rules: FormatRules,
    legal: BTreeSet<ItemId>,
    costs: BTreeMap<ItemId, u32>,
    content_hash: String,
}

impl CompiledFormat {
    pub fn compile(rules: FormatRules, catalog: &Catalog) -> Self {
        let mut legal = BTreeSet::new();
        let mut costs = BTreeMap::new();
        for item in catalog.iter() {
            let v = validate(item, &rules);
            if v.legal {
                legal.insert(item.id);
            }
            costs.insert(item.id, v.cost);
        }
        let content_hash = rules.content_hash();
        CompiledFormat {
            rules,
            legal,
            costs,
            content_hash,
        }
    }

    pub fn id(&self) -> &str {
        &self.rules.id
    }

    pub fn rules(&self) -> &FormatRules {
        &self.rules
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn is_legal(&self, id: ItemId) -> bool {
        self.legal.contains(&id)
    }

    pub fn cost_of(&self, id: ItemId) -> Option<u32> {
        self.costs.get(&id).copied()
    }

    pub fn legal_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.legal.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::item::BaseStats;

    fn item(id: ItemId, total_each: u16, generation: u8, categories: Vec<Category>) -> CatalogItem {
        CatalogItem {
            id,
            name: format!("Mon {id}"),
            types: vec!["Normal".into()],
            generation,
            stats: BaseStats {
                hp: total_each,
                attack: total_each,
                defense: total_each,
                special_attack: total_each,
                special_defense: total_each,
                speed: total_each,
            },
            categories,
        }
    }

    fn rules() -> FormatRules {
        FormatRules {
            id: "test".into(),
            name: "Test".into(),
            min_cost: 1,
            max_cost: 20,
            cost_formula: CostFormula::StatTotal { divisor: 30 },
            banlist: vec![],
            allowed_ids: None,
            allowed_generations: None,
            banned_categories: vec![],
            cost_overrides: vec![],
        }
    }

    #[test]
    fn banned_item_reports_explicit_ban() {
        let mut r = rules();
        r.banlist = vec![25];
        let v = validate(&item(25, 60, 1, vec![]), &r);
        assert!(!v.legal);
        assert_eq!(v.reason.as_deref(), Some("explicitly banned"));
    }

    #[test]
    fn ban_list_wins_over_membership_and_categories() {
        let mut r = rules();
        r.banlist = vec![150];
        r.allowed_generations = Some(vec![9]);
        r.banned_categories = vec![Category::Legendary];
        let v = validate(&item(150, 100, 1, vec![Category::Legendary]), &r);
        assert_eq!(v.reason.as_deref(), Some("explicitly banned"));
    }

    #[test]
    fn membership_checked_before_categories() {
        let mut r = rules();
        r.allowed_ids = Some(vec![1, 2, 3]);
        r.banned_categories = vec![Category::Legendary];
        let v = validate(&item(150, 100, 1, vec![Category::Legendary]), &r);
        assert_eq!(v.reason.as_deref(), Some("not in the allowed pokedex"));

        let mut r = rules();
        r.allowed_generations = Some(vec![9]);
        let v = validate(&item(4, 50, 1, vec![]), &r);
        assert_eq!(v.reason.as_deref(), Some("not in the allowed pokedex"));
    }

    #[test]
    fn first_configured_category_is_reported() {
        let mut r = rules();
        r.banned_categories = vec![Category::Restricted, Category::Legendary];
        let both = item(150, 100, 1, vec![Category::Legendary, Category::Restricted]);
        assert_eq!(
            validate(&both, &r).reason.as_deref(),
            Some("restricted pokemon are banned")
        );

        r.banned_categories = vec![Category::Legendary, Category::Restricted];
        assert_eq!(
            validate(&both, &r).reason.as_deref(),
            Some("legendary pokemon are banned")
        );
    }

    #[test]
    fn cost_is_clamped_then_overridden() {
        let r = rules();
        // 6 * 100 = 600 / 30 = 20
        assert_eq!(resolve_cost(&r, &item(1, 100, 1, vec![])), 20);
        // 6 * 120 = 720 / 30 = 24 -> clamped to 20
        assert_eq!(resolve_cost(&r, &item(2, 120, 1, vec![])), 20);
        // 6 * 2 = 12 / 30 = 0 -> clamped to 1
        assert_eq!(resolve_cost(&r, &item(3, 2, 1, vec![])), 1);

        let mut r = rules();
        r.cost_overrides = vec![CostOverride { item_id: 2, cost: 35 }];
        assert_eq!(resolve_cost(&r, &item(2, 120, 1, vec![])), 35);
    }

    #[test]
    fn tier_formula_picks_highest_reached_tier() {
        let mut r = rules();
        r.cost_formula = CostFormula::Tiers {
            tiers: vec![
                CostTier { min_total: 0, cost: 2 },
                CostTier { min_total: 500, cost: 10 },
                CostTier { min_total: 600, cost: 18 },
            ],
        };
        assert_eq!(resolve_cost(&r, &item(1, 50, 1, vec![])), 2);
        assert_eq!(resolve_cost(&r, &item(2, 90, 1, vec![])), 10);
        assert_eq!(resolve_cost(&r, &item(3, 110, 1, vec![])), 18);
    }

    #[test]
    fn content_hash_changes_with_rules() {
        let a = rules();
        let mut b = rules();
        assert_eq!(a.content_hash(), b.content_hash());
        b.banlist.push(7);
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }

    #[test]
    fn compile_builds_legal_set_and_costs() {
        let catalog = Catalog::new(vec![
            item(1, 50, 1, vec![]),
            item(150, 100, 1, vec![Category::Legendary]),
        ]);
        let mut r = rules();
        r.banned_categories = vec![Category::Legendary];
        let compiled = CompiledFormat::compile(r, &catalog);
        assert!(compiled.is_legal(1));
        assert!(!compiled.is_legal(150));
        assert_eq!(compiled.cost_of(1), Some(10));
        assert_eq!(compiled.cost_of(999), None);
        assert_eq!(compiled.legal_ids().collect::<Vec<_>>(), vec![1]);
    }
}
