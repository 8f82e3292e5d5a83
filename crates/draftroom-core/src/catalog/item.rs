// Catalog items (Pokémon) and CSV catalog loading.
//
// The catalog CSV has one row per species:
// `id,name,type1,type2,generation,hp,attack,defense,sp_attack,sp_defense,speed,categories`
// where `categories` is a `|`-separated list such as `legendary|restricted`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::draft::model::ItemId;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Category flags that formats can ban wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Legendary,
    Mythical,
    Paradox,
    SubLegendary,
    Restricted,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "legendary" => Some(Category::Legendary),
            "mythical" => Some(Category::Mythical),
            "paradox" => Some(Category::Paradox),
            "sub_legendary" => Some(Category::SubLegendary),
            "restricted" => Some(Category::Restricted),
            _ => None,
        }
    }

    /// Human-readable label used in legality reasons.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Legendary => "legendary",
            Category::Mythical => "mythical",
            Category::Paradox => "paradox",
            Category::SubLegendary => "sub-legendary",
            Category::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BaseStats {
    pub hp: u16,
    pub attack: u16,
    pub defense: u16,
    pub special_attack: u16,
    pub special_defense: u16,
    pub speed: u16,
}

impl BaseStats {
    /// Base stat total, the attribute most cost formulas key off.
    pub fn total(&self) -> u32 {
        [
            self.hp,
            self.attack,
            self.defense,
            self.special_attack,
            self.special_defense,
            self.speed,
        ]
        .iter()
        .map(|&s| s as u32)
        .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub name: String,
    pub types: Vec<String>,
    pub generation: u8,
    pub stats: BaseStats,
    pub categories: Vec<Category>,
}

impl CatalogItem {
    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }
}

/// The shared pool of draftable items, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: BTreeMap<ItemId, CatalogItem>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in catalog: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog is empty")]
    Empty,
}

// ---------------------------------------------------------------------------
// Raw CSV row (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawCatalogRow {
    id: ItemId,
    name: String,
    type1: String,
    #[serde(default)]
    type2: String,
    generation: u8,
    hp: u16,
    attack: u16,
    defense: u16,
    sp_attack: u16,
    sp_defense: u16,
    speed: u16,
    #[serde(default)]
    categories: String,
}

impl Catalog {
    pub fn new(items: impl IntoIterator<Item = CatalogItem>) -> Self {
        Catalog {
            items: items.into_iter().map(|item| (item.id, item)).collect(),
        }
    }

    /// Parse a catalog from CSV. Malformed rows and unknown category names are
    /// skipped with a warning; duplicate ids keep the last row.
    pub fn from_csv_reader<R: Read>(rdr: R) -> Result<Self, CatalogError> {
        let mut reader = csv::Reader::from_reader(rdr);
        let mut items = BTreeMap::new();
        for result in reader.deserialize::<RawCatalogRow>() {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("skipping malformed catalog row: {}", e);
                    continue;
                }
            };

            let mut categories = Vec::new();
            for tag in raw.categories.split('|').filter(|t| !t.trim().is_empty()) {
                match Category::parse(tag) {
                    Some(c) => categories.push(c),
                    None => warn!("unknown category '{}' on #{} {}", tag, raw.id, raw.name),
                }
            }

            let types = [raw.type1.trim(), raw.type2.trim()]
                .into_iter()
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();

            let item = CatalogItem {
                id: raw.id,
                name: raw.name.trim().to_string(),
                types,
                generation: raw.generation,
                stats: BaseStats {
                    hp: raw.hp,
                    attack: raw.attack,
                    defense: raw.defense,
                    special_attack: raw.sp_attack,
                    special_defense: raw.sp_defense,
                    speed: raw.speed,
                },
                categories,
            };
            if items.insert(item.id, item).is_some() {
                warn!("duplicate catalog id #{}, keeping the later row", raw.id);
            }
        }

        if items.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Catalog { items })
    }

    /// Load a catalog CSV from disk.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_csv_reader(file)
    }

    pub fn get(&self, id: ItemId) -> Option<&CatalogItem> {
        self.items.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
id,name,type1,type2,generation,hp,attack,defense,sp_attack,sp_defense,speed,categories
25,Pikachu,Electric,,1,35,55,40,50,50,90,
150,Mewtwo,Psychic,,1,106,110,90,154,90,130,legendary|restricted
151,Mew,Psychic,,1,100,100,100,100,100,100,mythical
1008,Miraidon,Electric,Dragon,9,100,85,100,135,115,135,legendary|paradox|restricted
";

    #[test]
    fn parses_rows_types_and_categories() {
        let catalog = Catalog::from_csv_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 4);

        let pikachu = catalog.get(25).unwrap();
        assert_eq!(pikachu.name, "Pikachu");
        assert_eq!(pikachu.types, vec!["Electric"]);
        assert!(pikachu.categories.is_empty());
        assert_eq!(pikachu.stats.total(), 320);

        let miraidon = catalog.get(1008).unwrap();
        assert_eq!(miraidon.types, vec!["Electric", "Dragon"]);
        assert!(miraidon.has_category(Category::Paradox));
        assert!(miraidon.has_category(Category::Restricted));
        assert!(!miraidon.has_category(Category::Mythical));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let csv = "\
id,name,type1,type2,generation,hp,attack,defense,sp_attack,sp_defense,speed,categories
1,Bulbasaur,Grass,Poison,1,45,49,49,65,65,45,
x,Broken,Normal,,1,1,1,1,1,1,1,
4,Charmander,Fire,,1,39,52,43,60,50,65,
";
        let catalog = Catalog::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get(1).is_some());
        assert!(catalog.get(4).is_some());
    }

    #[test]
    fn unknown_category_is_ignored() {
        let csv = "\
id,name,type1,type2,generation,hp,attack,defense,sp_attack,sp_defense,speed,categories
144,Articuno,Ice,Flying,1,90,85,100,95,125,85,sub-legendary|bird
";
        let catalog = Catalog::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(catalog.get(144).unwrap().categories, vec![Category::SubLegendary]);
    }

    #[test]
    fn empty_catalog_is_an_error() {
        let csv = "id,name,type1,type2,generation,hp,attack,defense,sp_attack,sp_defense,speed,categories\n";
        assert!(matches!(
            Catalog::from_csv_reader(csv.as_bytes()),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn category_parse_accepts_hyphenated_names() {
        assert_eq!(Category::parse("Sub-Legendary"), Some(Category::SubLegendary));
        assert_eq!(Category::parse("PARADOX"), Some(Category::Paradox));
        assert_eq!(Category::parse("starter"), None);
    }
}
