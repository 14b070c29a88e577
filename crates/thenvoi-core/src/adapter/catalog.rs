//! Availability checks for adapters.
//!
//! Adapters run inside the Python bridge, so "installed" means "importable
//! by the bridge's interpreter". The check is behind [`DependencyProbe`] so
//! callers and tests can substitute their own notion of installed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use tracing::debug;

use super::{AdapterError, AdapterInfo, AdapterKind};

/// Environment variable naming the Python interpreter used for probes.
pub const PYTHON_ENV: &str = "THENVOI_PYTHON";

const DEFAULT_PYTHON: &str = "python3";

const FIND_SPEC: &str =
    "import importlib.util, sys; sys.exit(0 if importlib.util.find_spec(sys.argv[1]) else 1)";

/// Decides whether a package is installed.
pub trait DependencyProbe: Send + Sync {
    fn is_installed(&self, package: &str) -> bool;
}

impl<F> DependencyProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_installed(&self, package: &str) -> bool {
        self(package)
    }
}

/// Probes packages by asking a Python interpreter whether it can import them.
///
/// Results are cached for the life of the probe. A missing interpreter makes
/// every package count as missing.
#[derive(Debug)]
pub struct PythonProbe {
    interpreter: Option<PathBuf>,
    cache: Mutex<HashMap<String, bool>>,
}

impl PythonProbe {
    /// Use `THENVOI_PYTHON`, falling back to `python3` on `PATH`.
    pub fn from_env() -> Self {
        let interpreter = std::env::var_os(PYTHON_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| which::which(DEFAULT_PYTHON).ok());
        Self::with_interpreter(interpreter)
    }

    pub fn with_interpreter(interpreter: Option<PathBuf>) -> Self {
        Self {
            interpreter,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn probe(&self, package: &str) -> bool {
        let Some(python) = &self.interpreter else {
            return false;
        };
        let status = Command::new(python)
            .args(["-c", FIND_SPEC, package])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(python = %python.display(), error = %e, "python probe failed to start");
                false
            }
        }
    }
}

impl DependencyProbe for PythonProbe {
    fn is_installed(&self, package: &str) -> bool {
        if let Ok(cache) = self.cache.lock() {
            if let Some(&hit) = cache.get(package) {
                return hit;
            }
        }
        let installed = self.probe(package);
        debug!(package, installed, "probed python package");
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(package.to_string(), installed);
        }
        installed
    }
}

/// Adapter metadata plus host availability.
pub struct AdapterCatalog {
    probe: Box<dyn DependencyProbe>,
}

impl std::fmt::Debug for AdapterCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCatalog").finish_non_exhaustive()
    }
}

impl AdapterCatalog {
    pub fn new(probe: impl DependencyProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
        }
    }

    /// A catalog backed by [`PythonProbe::from_env`].
    pub fn from_env() -> Self {
        Self::new(PythonProbe::from_env())
    }

    /// Every known adapter, in display order.
    pub fn list(&self) -> &'static [AdapterKind] {
        &AdapterKind::ALL
    }

    /// Look up an adapter by name.
    pub fn info(&self, name: &str) -> Result<&'static AdapterInfo, AdapterError> {
        name.parse::<AdapterKind>().map(AdapterKind::info)
    }

    /// Whether every package the adapter needs is installed.
    pub fn is_available(&self, kind: AdapterKind) -> bool {
        self.missing_packages(kind).is_empty()
    }

    pub fn missing_packages(&self, kind: AdapterKind) -> Vec<&'static str> {
        kind.info()
            .required_packages
            .iter()
            .copied()
            .filter(|pkg| !self.probe.is_installed(pkg))
            .collect()
    }

    pub fn default_model(&self, kind: AdapterKind) -> Option<&'static str> {
        kind.info().default_model
    }

    pub fn required_env_vars(&self, kind: AdapterKind) -> &'static [&'static str] {
        kind.info().env_vars
    }

    /// Required variables that `env` reports as unset or empty.
    pub fn missing_env_vars(
        &self,
        kind: AdapterKind,
        env: impl Fn(&str) -> Option<String>,
    ) -> Vec<&'static str> {
        self.required_env_vars(kind)
            .iter()
            .copied()
            .filter(|var| env(var).is_none_or(|v| v.is_empty()))
            .collect()
    }

    /// Fail unless the adapter's packages are installed and its required
    /// variables are set. Packages are checked first.
    pub fn ensure_ready(
        &self,
        kind: AdapterKind,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), AdapterError> {
        let missing = self.missing_packages(kind);
        if !missing.is_empty() {
            return Err(AdapterError::MissingDependencies {
                adapter: kind,
                packages: missing.into_iter().map(str::to_string).collect(),
            });
        }
        if let Some(var) = self.missing_env_vars(kind, env).first() {
            return Err(AdapterError::MissingEnvironment {
                adapter: kind,
                var: (*var).to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed(packages: &'static [&'static str]) -> AdapterCatalog {
        AdapterCatalog::new(move |pkg: &str| packages.contains(&pkg))
    }

    #[test]
    fn list_is_complete_and_ordered() {
        let catalog = installed(&[]);
        let names: Vec<_> = catalog.list().iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            [
                "langgraph",
                "anthropic",
                "pydantic-ai",
                "claude-sdk",
                "crewai",
                "parlant",
                "a2a",
                "a2a-gateway",
                "passthrough"
            ]
        );
    }

    #[test]
    fn info_rejects_unknown_names() {
        let catalog = installed(&[]);
        assert_eq!(catalog.info("crewai").unwrap().name, "crewai");
        assert!(matches!(
            catalog.info("nope"),
            Err(AdapterError::Unknown { .. })
        ));
    }

    #[test]
    fn missing_packages_reports_only_absent_ones() {
        let catalog = installed(&["langgraph"]);
        assert_eq!(
            catalog.missing_packages(AdapterKind::Langgraph),
            vec!["langchain_openai"]
        );
        assert!(!catalog.is_available(AdapterKind::Langgraph));
        assert!(catalog.is_available(AdapterKind::Passthrough));
    }

    #[test]
    fn missing_env_vars_treats_empty_as_unset() {
        let catalog = installed(&[]);
        let empty = |_: &str| Some(String::new());
        assert_eq!(
            catalog.missing_env_vars(AdapterKind::Anthropic, empty),
            vec!["ANTHROPIC_API_KEY"]
        );
        let set = |_: &str| Some("sk-ant-xyz".to_string());
        assert!(catalog.missing_env_vars(AdapterKind::Anthropic, set).is_empty());
    }

    #[test]
    fn ensure_ready_checks_packages_before_env() {
        let catalog = installed(&[]);
        let err = catalog
            .ensure_ready(AdapterKind::Anthropic, |_| None)
            .unwrap_err();
        assert!(matches!(err, AdapterError::MissingDependencies { .. }));

        let catalog = installed(&["anthropic"]);
        let err = catalog
            .ensure_ready(AdapterKind::Anthropic, |_| None)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "required environment variable 'ANTHROPIC_API_KEY' not set for anthropic adapter"
        );

        catalog
            .ensure_ready(AdapterKind::Anthropic, |_| Some("key".into()))
            .unwrap();
    }

    #[test]
    fn python_probe_without_interpreter_finds_nothing() {
        let probe = PythonProbe::with_interpreter(None);
        assert!(!probe.is_installed("sys"));
    }

    #[test]
    fn python_probe_with_missing_interpreter_finds_nothing() {
        let probe = PythonProbe::with_interpreter(Some(PathBuf::from("/nonexistent/python3")));
        assert!(!probe.is_installed("sys"));
    }

    #[cfg(unix)]
    #[test]
    fn python_probe_uses_exit_status_and_caches() {
        let sandbox = thenvoi_test_utils::Sandbox::new();
        let calls = sandbox.root().join("calls");
        // Fake interpreter: "$3" is the package name; only "present" exists.
        let script = sandbox.write_script(
            "python3",
            &format!(
                "echo \"$3\" >> '{}'\n[ \"$3\" = present ]",
                calls.display()
            ),
        );
        let probe = PythonProbe::with_interpreter(Some(script));

        assert!(probe.is_installed("present"));
        assert!(!probe.is_installed("absent"));
        assert!(probe.is_installed("present"));

        let log = std::fs::read_to_string(&calls).unwrap();
        assert_eq!(log.lines().collect::<Vec<_>>(), ["present", "absent"]);
    }
}
