//! Question catalog: categories and their (regular, sneaky) question pairs.

use std::{fs, io::ErrorKind, path::Path};

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A regular question and the alternate one handed to the odd-ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPair {
    pub regular: String,
    pub sneaky: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub questions: Vec<QuestionPair>,
}

/// Immutable catalog loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCatalog {
    categories: Vec<Category>,
}

impl QuestionCatalog {
    /// Build a catalog from categories, dropping those without questions.
    pub fn new(categories: Vec<Category>) -> Self {
        let categories = categories
            .into_iter()
            .filter(|category| !category.questions.is_empty())
            .collect();
        Self { categories }
    }

    /// Load the catalog from a JSON file, falling back to the built-in catalog.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<QuestionCatalog>(&contents) {
                Ok(raw) => {
                    let catalog = Self::new(raw.categories);
                    if catalog.categories.is_empty() {
                        warn!(
                            path = %path.display(),
                            "question catalog has no usable category; using built-in questions"
                        );
                        return Self::default();
                    }
                    info!(
                        path = %path.display(),
                        count = catalog.categories.len(),
                        "loaded question catalog"
                    );
                    catalog
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse question catalog; using built-in questions"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "question catalog not found; using built-in questions"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read question catalog; using built-in questions"
                );
                Self::default()
            }
        }
    }

    /// Category names in catalog order.
    pub fn categories(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|category| category.name.clone())
            .collect()
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Uniformly pick a question pair of `category`. `None` when the category is unknown.
    pub fn pick_question<R: Rng + ?Sized>(
        &self,
        category: &str,
        rng: &mut R,
    ) -> Option<QuestionPair> {
        self.find(category)?.questions.choose(rng).cloned()
    }

    fn find(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|category| category.name == name)
    }
}

impl Default for QuestionCatalog {
    fn default() -> Self {
        Self::new(default_categories())
    }
}

fn pair(regular: &str, sneaky: &str) -> QuestionPair {
    QuestionPair {
        regular: regular.into(),
        sneaky: sneaky.into(),
    }
}

/// Built-in catalog shipped with the binary.
fn default_categories() -> Vec<Category> {
    vec![
        Category {
            name: "Animals".into(),
            questions: vec![
                pair(
                    "Which animal would make the best pet?",
                    "Which animal would you least like to meet at night?",
                ),
                pair(
                    "What is the fastest animal you can think of?",
                    "What is the slowest animal you can think of?",
                ),
                pair(
                    "Which animal would you like to be for a day?",
                    "Which animal smells the worst?",
                ),
            ],
        },
        Category {
            name: "Food".into(),
            questions: vec![
                pair(
                    "What do you eat for breakfast on a perfect day?",
                    "What would you never eat for breakfast?",
                ),
                pair(
                    "Which dish would you cook to impress someone?",
                    "Which dish did you burn most recently?",
                ),
                pair(
                    "What is your favourite snack?",
                    "What is a snack you find overrated?",
                ),
            ],
        },
        Category {
            name: "Travel".into(),
            questions: vec![
                pair(
                    "Where would you go on your dream holiday?",
                    "Where would you never go on holiday?",
                ),
                pair(
                    "What is the first thing you pack for a trip?",
                    "What do you always forget to pack?",
                ),
            ],
        },
        Category {
            name: "Hobbies".into(),
            questions: vec![
                pair(
                    "What hobby would you pick up with unlimited time?",
                    "What hobby would you give up first?",
                ),
                pair(
                    "Which sport is the most fun to watch?",
                    "Which sport is the most boring to watch?",
                ),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn default_catalog_lists_categories() {
        let catalog = QuestionCatalog::default();
        assert_eq!(
            catalog.categories(),
            vec!["Animals", "Food", "Travel", "Hobbies"]
        );
        assert!(catalog.has_category("Animals"));
        assert!(!catalog.has_category("Space"));
    }

    #[test]
    fn pick_question_covers_every_question_of_the_category() {
        let catalog = QuestionCatalog::new(vec![Category {
            name: "Pair".into(),
            questions: vec![pair("a", "A"), pair("b", "B")],
        }]);
        let mut rng = StdRng::seed_from_u64(7);

        let seen: HashSet<_> = (0..64)
            .filter_map(|_| catalog.pick_question("Pair", &mut rng))
            .map(|question| question.regular)
            .collect();
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn unknown_category_has_no_question() {
        let catalog = QuestionCatalog::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(catalog.pick_question("Space", &mut rng).is_none());
    }

    #[test]
    fn empty_categories_are_dropped() {
        let catalog = QuestionCatalog::new(vec![
            Category {
                name: "Empty".into(),
                questions: vec![],
            },
            Category {
                name: "Full".into(),
                questions: vec![pair("q", "s")],
            },
        ]);
        assert_eq!(catalog.categories(), vec!["Full"]);
    }

    #[test]
    fn catalog_parses_from_json() {
        let raw = r#"{"categories":[{"name":"Music","questions":[{"regular":"r","sneaky":"s"}]}]}"#;
        let catalog: QuestionCatalog = serde_json::from_str(raw).unwrap();
        assert_eq!(catalog.categories(), vec!["Music"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let catalog = QuestionCatalog::load(Path::new("/definitely/not/here/questions.json"));
        assert_eq!(catalog, QuestionCatalog::default());
    }
}
