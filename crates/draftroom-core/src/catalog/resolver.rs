// Memoized legality/cost resolver shared by the pick validator, the auction
// machine and the wishlist resolver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use super::format::{validate, CompiledFormat, FormatRules, Validation};
use super::item::{Catalog, CatalogItem};
use crate::draft::model::ItemId;

type MemoKey = (ItemId, String);

/// Resolves `(item, format)` to a [`Validation`].
///
/// Results are cached per `(item id, format id)` together with the content
/// hash of the compiled format that produced them; a cached entry whose hash
/// no longer matches the installed format is recomputed.
pub struct FormatResolver {
    catalog: Arc<Catalog>,
    formats: HashMap<String, CompiledFormat>,
    memo: Mutex<HashMap<MemoKey, (String, Validation)>>,
}

impl FormatResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        FormatResolver {
            catalog,
            formats: HashMap::new(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Build a resolver with every given ruleset compiled against `catalog`.
    pub fn with_formats(catalog: Arc<Catalog>, rules: impl IntoIterator<Item = FormatRules>) -> Self {
        let mut resolver = FormatResolver::new(catalog);
        for r in rules {
            resolver.install(r);
        }
        resolver
    }

    /// Compile and install (or replace) a format. Memo entries for the
    /// format are dropped when its content hash changes.
    pub fn install(&mut self, rules: FormatRules) {
        let compiled = CompiledFormat::compile(rules, &self.catalog);
        let id = compiled.id().to_string();
        let changed = self
            .formats
            .get(&id)
            .map_or(true, |old| old.content_hash() != compiled.content_hash());
        if changed {
            let mut memo = self.memo();
            memo.retain(|(_, format_id), _| format_id != &id);
            info!(
                "installed format '{}' ({} legal items, hash {})",
                id,
                compiled.legal_ids().count(),
                &compiled.content_hash()[..12]
            );
        }
        self.formats.insert(id, compiled);
    }

    fn memo(&self) -> MutexGuard<'_, HashMap<MemoKey, (String, Validation)>> {
        // A poisoned memo only holds cached values; keep using it.
        self.memo.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn item(&self, item_id: ItemId) -> Option<&CatalogItem> {
        self.catalog.get(item_id)
    }

    pub fn format(&self, format_id: &str) -> Option<&CompiledFormat> {
        self.formats.get(format_id)
    }

    pub fn has_format(&self, format_id: &str) -> bool {
        self.formats.contains_key(format_id)
    }

    pub fn format_ids(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    /// Legality and cost of `item_id` under `format_id`. Unknown formats and
    /// items are reported as illegal with cost 0.
    pub fn validate(&self, item_id: ItemId, format_id: &str) -> Validation {
        let Some(format) = self.formats.get(format_id) else {
            return Validation::illegal(format!("unknown format '{format_id}'"), 0);
        };
        let Some(item) = self.catalog.get(item_id) else {
            return Validation::illegal("not in the catalog", 0);
        };

        let key = (item_id, format_id.to_string());
        if let Some((hash, cached)) = self.memo().get(&key) {
            if hash == format.content_hash() {
                return cached.clone();
            }
        }

        debug!("resolving #{} under '{}'", item_id, format_id);
        let result = validate(item, format.rules());
        self.memo()
            .insert(key, (format.content_hash().to_string(), result.clone()));
        result
    }

    pub fn is_legal(&self, item_id: ItemId, format_id: &str) -> bool {
        self.validate(item_id, format_id).legal
    }

    /// Legal item ids under a format, ascending.
    pub fn legal_ids(&self, format_id: &str) -> Vec<ItemId> {
        self.formats
            .get(format_id)
            .map(|f| f.legal_ids().collect())
            .unwrap_or_default()
    }

    /// Number of cached validations (all formats).
    pub fn memo_len(&self) -> usize {
        self.memo().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::format::CostFormula;
    use crate::catalog::item::{BaseStats, Category};

    fn mon(id: ItemId, each: u16, categories: Vec<Category>) -> CatalogItem {
        CatalogItem {
            id,
            name: format!("Mon {id}"),
            types: vec!["Electric".into()],
            generation: 1,
            stats: BaseStats {
                hp: each,
                attack: each,
                defense: each,
                special_attack: each,
                special_defense: each,
                speed: each,
            },
            categories,
        }
    }

    fn rules(banlist: Vec<ItemId>) -> FormatRules {
        FormatRules {
            id: "ou".into(),
            name: "OverUsed".into(),
            min_cost: 1,
            max_cost: 20,
            cost_formula: CostFormula::StatTotal { divisor: 30 },
            banlist,
            allowed_ids: None,
            allowed_generations: None,
            banned_categories: vec![Category::Legendary],
            cost_overrides: vec![],
        }
    }

    fn resolver() -> FormatResolver {
        let catalog = Arc::new(Catalog::new(vec![
            mon(25, 55, vec![]),
            mon(26, 80, vec![]),
            mon(150, 110, vec![Category::Legendary]),
        ]));
        FormatResolver::with_formats(catalog, vec![rules(vec![25])])
    }

    #[test]
    fn banned_item_is_illegal_with_explicit_reason() {
        let r = resolver();
        let v = r.validate(25, "ou");
        assert!(!v.legal);
        assert_eq!(v.reason.as_deref(), Some("explicitly banned"));
    }

    #[test]
    fn legal_item_has_clamped_cost() {
        let r = resolver();
        let v = r.validate(26, "ou");
        assert!(v.legal);
        assert_eq!(v.reason, None);
        assert_eq!(v.cost, 16);
        assert_eq!(r.validate(150, "ou").reason.as_deref(), Some("legendary pokemon are banned"));
    }

    #[test]
    fn unknown_format_and_item_are_illegal() {
        let r = resolver();
        assert!(!r.validate(26, "ubers").legal);
        assert!(!r.validate(9999, "ou").legal);
        assert_eq!(r.validate(9999, "ou").cost, 0);
    }

    #[test]
    fn results_are_memoized() {
        let r = resolver();
        assert_eq!(r.memo_len(), 0);
        r.validate(26, "ou");
        r.validate(26, "ou");
        assert_eq!(r.memo_len(), 1);
    }

    #[test]
    fn reinstalling_changed_rules_invalidates_memo() {
        let mut r = resolver();
        assert!(r.validate(26, "ou").legal);
        assert_eq!(r.memo_len(), 1);

        r.install(rules(vec![25, 26]));
        assert_eq!(r.memo_len(), 0);
        let v = r.validate(26, "ou");
        assert!(!v.legal);
        assert_eq!(v.reason.as_deref(), Some("explicitly banned"));
        assert_eq!(r.legal_ids("ou"), Vec::<ItemId>::new());
    }

    #[test]
    fn reinstalling_identical_rules_keeps_memo() {
        let mut r = resolver();
        r.validate(26, "ou");
        r.install(rules(vec![25]));
        assert_eq!(r.memo_len(), 1);
    }
}
