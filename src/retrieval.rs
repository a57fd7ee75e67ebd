use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::error::PraxisError;

/// Source of documentation snippets for prompt augmentation.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>, PraxisError>;
}

/// Used when no documentation directory is configured.
pub struct NoRetriever;

impl Retriever for NoRetriever {
    fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<String>, PraxisError> {
        Ok(Vec::new())
    }
}

struct Document {
    text: String,
    terms: HashSet<String>,
}

/// Whole-document lexical retriever over a directory of `.md` and `.txt`
/// files.
pub struct DocsRetriever {
    docs: Vec<Document>,
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

impl DocsRetriever {
    pub fn from_texts(texts: Vec<String>) -> Result<Self, PraxisError> {
        let docs: Vec<Document> = texts
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(|text| Document {
                terms: terms(&text),
                text,
            })
            .collect();
        if docs.is_empty() {
            return Err(PraxisError::Retrieval("no documents to index".into()));
        }
        Ok(Self { docs })
    }

    /// Collect every non-empty `.md` file under `dir`, then every `.txt`
    /// file, each group in path order.
    pub fn load(dir: &Path) -> Result<Self, PraxisError> {
        if !dir.is_dir() {
            return Err(PraxisError::Retrieval(format!(
                "docs directory not found: {}",
                dir.display()
            )));
        }
        let mut texts = Vec::new();
        for ext in ["md", "txt"] {
            let pattern = format!("{}/**/*.{ext}", glob::Pattern::escape(&dir.to_string_lossy()));
            let paths = glob::glob(&pattern)
                .map_err(|e| PraxisError::Retrieval(format!("bad docs pattern: {e}")))?;
            for path in paths.flatten() {
                if path.is_file() {
                    texts.push(std::fs::read_to_string(&path)?);
                }
            }
        }
        let retriever = Self::from_texts(texts).map_err(|_| {
            PraxisError::Retrieval(format!(
                "No documents found in {} (searched .md and .txt)",
                dir.display()
            ))
        })?;
        info!(
            "Loaded {} documentation files from {}",
            retriever.len(),
            dir.display()
        );
        Ok(retriever)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl Retriever for DocsRetriever {
    fn retrieve(&self, query: &str, k: usize) -> Result<Vec<String>, PraxisError> {
        let query_terms = terms(query);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(usize, usize)> = self
            .docs
            .iter()
            .enumerate()
            .map(|(idx, doc)| (idx, query_terms.intersection(&doc.terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();
        // Stable sort keeps document order among equal scores.
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(idx, _)| self.docs[idx].text.clone())
            .collect())
    }
}

pub fn create_retriever(config: &Config) -> Result<Box<dyn Retriever>, PraxisError> {
    match config.docs_dir.as_deref() {
        Some(dir) => Ok(Box::new(DocsRetriever::load(Path::new(dir))?)),
        None => {
            info!("No docs_dir configured, retrieval disabled");
            Ok(Box::new(NoRetriever))
        }
    }
}
