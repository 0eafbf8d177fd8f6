// tb-common/src/formulary.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::config::Config;
use super::error::{Result, TbError};
use super::model::formula::Formula;

/// Loads formula definitions from `<formula_dir>/<name>.json` and keeps every parsed formula
/// for the rest of the command.
#[derive(Debug)]
pub struct Formulary {
    formula_dir: Option<PathBuf>,
    parsed_cache: Mutex<HashMap<String, Arc<Formula>>>,
}

impl Formulary {
    pub fn new(config: &Config) -> Self {
        Self {
            formula_dir: Some(config.formula_dir().to_path_buf()),
            parsed_cache: Mutex::new(HashMap::new()),
        }
    }

    /// A formulary backed only by the given definitions.
    pub fn from_formulae(formulae: impl IntoIterator<Item = Formula>) -> Self {
        let parsed = formulae
            .into_iter()
            .map(|f| (f.name.clone(), Arc::new(f)))
            .collect();
        Self {
            formula_dir: None,
            parsed_cache: Mutex::new(parsed),
        }
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, Arc<Formula>>> {
        // A poisoned cache still holds only fully parsed formulae.
        self.parsed_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn definition_path(&self, name: &str) -> Option<PathBuf> {
        self.formula_dir
            .as_ref()
            .map(|dir| dir.join(format!("{name}.json")))
    }

    /// Loads a formula by name. Tap-qualified names (`user/repo/name`) resolve to `name`.
    pub fn load_formula(&self, name: &str) -> Result<Arc<Formula>> {
        let name = bare_name(name)?;
        if let Some(formula) = self.cache().get(name) {
            debug!("Loaded formula '{}' from parsed cache.", name);
            return Ok(Arc::clone(formula));
        }

        let path = self
            .definition_path(name)
            .filter(|p| p.is_file())
            .ok_or_else(|| TbError::NotFound(format!("No available formula with the name \"{name}\"")))?;
        let raw = std::fs::read_to_string(&path)?;
        let formula: Formula = serde_json::from_str(&raw).map_err(|e| {
            TbError::ParseError("formula", format!("{}: {e}", path.display()))
        })?;
        if formula.name != name {
            return Err(TbError::ParseError(
                "formula",
                format!(
                    "{} defines '{}' instead of '{}'",
                    path.display(),
                    formula.name,
                    name
                ),
            ));
        }
        debug!(
            "Successfully loaded formula '{}' version {}",
            formula.name,
            formula.pkg_version()
        );
        let formula = Arc::new(formula);
        self.cache()
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&formula));
        Ok(formula)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.load_formula(name).is_ok()
    }

    /// Raw bytes of a formula's definition, as hashed into install receipts.
    pub fn definition_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let name = bare_name(name)?;
        if let Some(path) = self.definition_path(name).filter(|p| p.is_file()) {
            return Ok(std::fs::read(path)?);
        }
        let formula = self.load_formula(name)?;
        Ok(serde_json::to_vec(formula.as_ref())?)
    }
}

fn bare_name(name: &str) -> Result<&str> {
    let bare = name.rsplit('/').next().unwrap_or(name);
    if bare.is_empty() || bare.starts_with('.') {
        return Err(TbError::NotFound(format!("Invalid formula name \"{name}\"")));
    }
    Ok(bare)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn loads_definitions_from_formula_dir() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_prefix(dir.path());
        fs::create_dir_all(config.formula_dir()).unwrap();
        fs::write(
            config.formula_dir().join("zlib.json"),
            r#"{"name":"zlib","version":"1.3","url":"file:///zlib.tar.gz"}"#,
        )
        .unwrap();
        let formulary = Formulary::new(&config);
        let zlib = formulary.load_formula("homebrew/core/zlib").unwrap();
        assert_eq!(zlib.version.as_str(), "1.3");
        assert!(Arc::ptr_eq(&zlib, &formulary.load_formula("zlib").unwrap()));
        assert!(!formulary.definition_bytes("zlib").unwrap().is_empty());
    }

    #[test]
    fn missing_and_mismatched_definitions_fail() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_prefix(dir.path());
        fs::create_dir_all(config.formula_dir()).unwrap();
        fs::write(
            config.formula_dir().join("foo.json"),
            r#"{"name":"bar","version":"1.0"}"#,
        )
        .unwrap();
        let formulary = Formulary::new(&config);
        assert!(matches!(
            formulary.load_formula("nope"),
            Err(TbError::NotFound(_))
        ));
        assert!(matches!(
            formulary.load_formula("foo"),
            Err(TbError::ParseError(..))
        ));
    }

    #[test]
    fn in_memory_formulary_serves_given_formulae() {
        let formulary = Formulary::from_formulae([Formula::new("a", "1.0").unwrap()]);
        assert!(formulary.exists("a"));
        assert!(!formulary.exists("b"));
        assert!(formulary.definition_bytes("a").is_ok());
    }
}
