//! File-backed template store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::types::{Template, TemplateSummary};
use super::TemplateError;

const DEFAULT_TEMPLATES: &str = include_str!("../../templates/default_templates.yaml");

/// On-disk layout: a named collection of template records.
#[derive(Debug, Serialize, Deserialize)]
struct TemplateFile<T> {
    #[serde(default = "Vec::new")]
    templates: Vec<T>,
}

type Snapshot = Arc<BTreeMap<String, Template>>;

/// Store for judge templates.
///
/// Readers clone the current snapshot pointer and never hold a lock across
/// I/O. Writers serialize on `write_lock`, persist the new collection, and
/// only then publish it.
#[derive(Debug)]
pub struct TemplateStore {
    snapshot: RwLock<Snapshot>,
    write_lock: Mutex<()>,
    storage_path: Option<PathBuf>,
    /// Records from the backing file that could not be loaded. They are
    /// written back untouched so a fix by hand is never lost.
    skipped: Vec<Value>,
}

/// Shared template store wrapped in Arc for concurrent access.
pub type SharedTemplateStore = Arc<TemplateStore>;

impl TemplateStore {
    /// Open the store at `path`, seeding it with the built-in templates if
    /// the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let path = path.into();

        let (templates, skipped) = if tokio::fs::try_exists(&path).await? {
            let contents = tokio::fs::read_to_string(&path).await?;
            let file = decode(&path, &contents)?;
            let (templates, skipped) = load_records(file.templates);
            tracing::info!(
                "Loaded {} templates from {} ({} skipped)",
                templates.len(),
                path.display(),
                skipped.len()
            );
            (templates, skipped)
        } else {
            let templates = Self::builtin()?;
            tracing::info!(
                "No template file at {}, seeding {} built-in templates",
                path.display(),
                templates.len()
            );
            write_file(&path, &templates, &[]).await?;
            (templates, Vec::new())
        };

        Ok(Self {
            snapshot: RwLock::new(Arc::new(templates)),
            write_lock: Mutex::new(()),
            storage_path: Some(path),
            skipped,
        })
    }

    /// A store without disk persistence.
    pub fn in_memory(templates: impl IntoIterator<Item = Template>) -> Self {
        let templates = keep_valid(templates.into_iter().collect());
        Self {
            snapshot: RwLock::new(Arc::new(templates)),
            write_lock: Mutex::new(()),
            storage_path: None,
            skipped: Vec::new(),
        }
    }

    /// An in-memory store holding the built-in templates.
    pub fn with_builtin() -> Result<Self, TemplateError> {
        let templates = Self::builtin()?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(templates)),
            write_lock: Mutex::new(()),
            storage_path: None,
            skipped: Vec::new(),
        })
    }

    fn builtin() -> Result<BTreeMap<String, Template>, TemplateError> {
        let file: TemplateFile<Template> =
            serde_yaml::from_str(DEFAULT_TEMPLATES).map_err(|e| TemplateError::Format {
                path: "built-in templates".to_string(),
                message: e.to_string(),
            })?;
        let mut templates = BTreeMap::new();
        for template in file.templates {
            template.validate()?;
            templates.insert(template.id.clone(), template);
        }
        Ok(templates)
    }

    async fn current(&self) -> Snapshot {
        Arc::clone(&*self.snapshot.read().await)
    }

    pub async fn get(&self, id: &str) -> Result<Template, TemplateError> {
        self.current()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<TemplateSummary> {
        self.current()
            .await
            .values()
            .map(Template::summary)
            .collect()
    }

    pub async fn create(&self, template: Template) -> Result<Template, TemplateError> {
        template.validate()?;
        let _guard = self.write_lock.lock().await;

        let current = self.current().await;
        if current.contains_key(&template.id) {
            return Err(TemplateError::Conflict(template.id));
        }
        let mut next = (*current).clone();
        next.insert(template.id.clone(), template.clone());
        self.publish(next).await?;

        tracing::info!("Created template: {} ({})", template.name, template.id);
        Ok(template)
    }

    /// Overwrite the template stored under `id`.
    pub async fn update(&self, id: &str, template: Template) -> Result<Template, TemplateError> {
        if template.id != id {
            return Err(TemplateError::Invalid(format!(
                "template_id '{}' does not match '{}'; ids cannot change",
                template.id, id
            )));
        }
        template.validate()?;
        let _guard = self.write_lock.lock().await;

        let current = self.current().await;
        if !current.contains_key(id) {
            return Err(TemplateError::NotFound(id.to_string()));
        }
        let mut next = (*current).clone();
        next.insert(id.to_string(), template.clone());
        self.publish(next).await?;

        tracing::info!("Updated template: {} ({})", template.name, id);
        Ok(template)
    }

    pub async fn delete(&self, id: &str) -> Result<(), TemplateError> {
        let _guard = self.write_lock.lock().await;

        let current = self.current().await;
        if !current.contains_key(id) {
            return Err(TemplateError::NotFound(id.to_string()));
        }
        let mut next = (*current).clone();
        next.remove(id);
        self.publish(next).await?;

        tracing::info!("Deleted template: {}", id);
        Ok(())
    }

    /// Persist then swap in a new collection. Callers hold `write_lock`.
    async fn publish(&self, next: BTreeMap<String, Template>) -> Result<(), TemplateError> {
        if let Some(path) = &self.storage_path {
            write_file(path, &next, &self.skipped).await?;
        }
        *self.snapshot.write().await = Arc::new(next);
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn decode(path: &Path, contents: &str) -> Result<TemplateFile<Value>, TemplateError> {
    let result = if is_yaml(path) {
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    };
    result.map_err(|message| TemplateError::Format {
        path: path.display().to_string(),
        message,
    })
}

fn keep_valid(templates: Vec<Template>) -> BTreeMap<String, Template> {
    let mut valid = BTreeMap::new();
    for template in templates {
        match template.validate() {
            Ok(()) => {
                if valid.contains_key(&template.id) {
                    tracing::warn!("Skipping duplicate template id {}", template.id);
                    continue;
                }
                valid.insert(template.id.clone(), template);
            }
            Err(e) => tracing::warn!("Skipping template {}: {}", template.id, e),
        }
    }
    valid
}

/// Split raw file records into loadable templates and records to carry along.
fn load_records(records: Vec<Value>) -> (BTreeMap<String, Template>, Vec<Value>) {
    let mut valid = BTreeMap::new();
    let mut skipped = Vec::new();
    for record in records {
        let label = record
            .get("template_id")
            .and_then(Value::as_str)
            .unwrap_or("<no id>")
            .to_string();
        let template = match serde_json::from_value::<Template>(record.clone()) {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!("Skipping template {}: {}", label, e);
                skipped.push(record);
                continue;
            }
        };
        if let Err(e) = template.validate() {
            tracing::warn!("Skipping template {}: {}", label, e);
            skipped.push(record);
            continue;
        }
        if valid.contains_key(&template.id) {
            tracing::warn!(
                "Dropping duplicate template id {}; the next write removes it from disk",
                template.id
            );
            continue;
        }
        valid.insert(template.id.clone(), template);
    }
    (valid, skipped)
}

/// Write the collection to a sibling temp file and rename it into place.
///
/// Skipped records are appended unless a live template now owns their id.
async fn write_file(
    path: &Path,
    templates: &BTreeMap<String, Template>,
    skipped: &[Value],
) -> Result<(), TemplateError> {
    let mut records = templates
        .values()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    records.extend(
        skipped
            .iter()
            .filter(|record| {
                record
                    .get("template_id")
                    .and_then(Value::as_str)
                    .map_or(true, |id| !templates.contains_key(id))
            })
            .cloned(),
    );
    let file = TemplateFile { templates: records };
    let contents = if is_yaml(path) {
        serde_yaml::to_string(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
    } else {
        serde_json::to_string_pretty(&file)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    tracing::debug!("Saved {} templates to {}", templates.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{FieldDecl, OutputParserRules, PromptStructure};
    use tempfile::tempdir;

    fn code_quality() -> Template {
        let mut format = BTreeMap::new();
        format.insert("quality_score".to_string(), FieldDecl::new("number (1-5)"));
        format.insert("suggestions".to_string(), FieldDecl::new("array of strings"));
        Template {
            id: "code_quality".to_string(),
            name: "Code Quality Evaluation".to_string(),
            target_judge_model_family: Some("mistral".to_string()),
            description: Some("Template for evaluating code quality".to_string()),
            prompt_structure: PromptStructure {
                system_message: "You are an expert software developer.".to_string(),
                user_instruction_prefix: "Evaluate this code:\n\n{evaluation_criteria}\n\n"
                    .to_string(),
                user_instruction_suffix: "\n\n{output_format_instruction}".to_string(),
            },
            output_parser_rules: OutputParserRules::Json { format },
        }
    }

    #[tokio::test]
    async fn test_builtin_templates_are_valid() {
        let store = TemplateStore::with_builtin().unwrap();
        let ids: Vec<String> = store.list().await.into_iter().map(|s| s.id).collect();
        for expected in [
            "binary_classification",
            "likert_scale",
            "pairwise_comparison",
            "factual_accuracy",
            "toxicity_detection",
            "hallucination_detection",
        ] {
            assert!(ids.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let store = TemplateStore::in_memory(vec![]);
        let template = code_quality();
        store.create(template.clone()).await.unwrap();

        let fetched = store.get("code_quality").await.unwrap();
        assert_eq!(fetched.prompt_structure, template.prompt_structure);
        assert_eq!(fetched.output_parser_rules, template.output_parser_rules);
        assert_eq!(
            serde_json::to_string(&fetched.output_parser_rules).unwrap(),
            serde_json::to_string(&template.output_parser_rules).unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let store = TemplateStore::in_memory(vec![code_quality()]);
        let err = store.create(code_quality()).await.unwrap_err();
        assert!(matches!(err, TemplateError::Conflict(id) if id == "code_quality"));
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let store = TemplateStore::in_memory(vec![code_quality()]);
        let mut changed = code_quality();
        changed.description = Some("Stricter review".to_string());

        let once = store.update("code_quality", changed.clone()).await.unwrap();
        let twice = store.update("code_quality", changed.clone()).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.get("code_quality").await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = TemplateStore::in_memory(vec![]);
        assert!(matches!(
            store.update("code_quality", code_quality()).await,
            Err(TemplateError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("code_quality").await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let store = TemplateStore::in_memory(vec![code_quality()]);
        let mut renamed = code_quality();
        renamed.id = "other".to_string();
        assert!(matches!(
            store.update("code_quality", renamed).await,
            Err(TemplateError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_template_rejected_on_create() {
        let store = TemplateStore::in_memory(vec![]);
        let mut bad = code_quality();
        bad.output_parser_rules = OutputParserRules::Json {
            format: BTreeMap::new(),
        };
        assert!(matches!(
            store.create(bad).await,
            Err(TemplateError::Invalid(_))
        ));
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("templates.json");

        let store = TemplateStore::open(&path).await.unwrap();
        assert!(path.exists());
        store.create(code_quality()).await.unwrap();
        store.delete("likert_scale").await.unwrap();
        drop(store);

        let reopened = TemplateStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("code_quality").await.unwrap(), code_quality());
        assert!(reopened.get("likert_scale").await.is_err());
        assert!(reopened.get("pairwise_comparison").await.is_ok());
    }

    #[tokio::test]
    async fn test_yaml_backing_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("templates.yaml");

        let store = TemplateStore::open(&path).await.unwrap();
        store.create(code_quality()).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("template_id: code_quality"));

        let reopened = TemplateStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("code_quality").await.unwrap(), code_quality());
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped_on_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("templates.json");
        let mut bad = serde_json::to_value(code_quality()).unwrap();
        bad["template_id"] = serde_json::json!("broken");
        bad["prompt_structure"]["user_instruction_prefix"] = serde_json::json!("{mystery}");
        let file = serde_json::json!({ "templates": [code_quality(), bad] });
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let store = TemplateStore::open(&path).await.unwrap();
        assert!(store.get("code_quality").await.is_ok());
        assert!(matches!(
            store.get("broken").await,
            Err(TemplateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_skipped_records_survive_writes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("templates.json");
        let mut bad = serde_json::to_value(code_quality()).unwrap();
        bad["template_id"] = serde_json::json!("broken");
        bad["prompt_structure"]["user_instruction_prefix"] = serde_json::json!("{mystery}");
        let incomplete = serde_json::json!({"template_id": "half_written"});
        let file = serde_json::json!({ "templates": [bad, incomplete] });
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let store = TemplateStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
        store.create(code_quality()).await.unwrap();

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let records = on_disk["templates"].as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.contains(&bad));
        assert!(records.contains(&incomplete));

        let reopened = TemplateStore::open(&path).await.unwrap();
        assert_eq!(reopened.get("code_quality").await.unwrap(), code_quality());
        assert_eq!(reopened.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("templates.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            TemplateStore::open(&path).await,
            Err(TemplateError::Format { .. })
        ));
    }
}
