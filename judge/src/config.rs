//! Configuration loading. One textual dialect (YAML, via `serde_yaml`) is
//! supported; this is a deliberate scope limit, not an oversight — see
//! SPEC_FULL.md §1's "deliberately out of scope" note on configuration
//! parsing. Grounded in `driver/src/config.rs`'s `serde` + `serde_yaml`
//! loading idiom, minus its process-wide `static mut SINGLETON`: the loaded
//! [`Configuration`] is returned to the caller, who threads it through
//! [`crate::JudgeContext`] explicitly instead.

use std::path::Path;

use log::info;

use crate::{Configuration, Environment, Error, ErrorKind, ResultExt, Result, Testcases};

/// Load a [`Configuration`] from a YAML file at `path`.
pub fn load_configuration(path: &Path) -> Result<Configuration> {
    info!("loading configuration from {}", path.display());

    let content = std::fs::read_to_string(path)?;
    let config: Configuration = serde_yaml::from_str(&content)
        .chain_err(|| Error::from(ErrorKind::Internal(format!(
            "malformed configuration file: {}", path.display()))))?;

    Ok(config)
}

/// Load a single problem's [`Testcases`] metadata from its `Settings.cfg`
/// (a YAML document, per the scope limit noted above).
pub fn load_testcases(path: &Path) -> Result<Testcases> {
    let content = std::fs::read_to_string(path)?;
    let testcases: Testcases = serde_yaml::from_str(&content)
        .chain_err(|| Error::from(ErrorKind::Internal(format!(
            "malformed testcases file: {}", path.display()))))?;

    Ok(testcases)
}

/// The built-in default configuration used when `--settings` is omitted: an
/// empty compiler table and a `contest_house` rooted at `./judge-work`.
pub fn default_configuration() -> Configuration {
    Configuration {
        compiler: Vec::new(),
        environment: Environment {
            identifier: "default".to_string(),
            submit_dir: String::new(),
            decompress_dir: String::new(),
            active_security: false,
            contest_house: "./judge-work".to_string(),
            admin_user_name: String::new(),
            admin_password: String::new(),
            admin_domain: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_configuration_yaml() {
        let yaml = r#"
            compiler:
              - ext: ".cpp"
                cmd: "g++ %PATH% -o %NAME%|@WorkDir=%PATH%"
            environment:
              identifier: "default"
              contest_house: "/contest/house"
        "#;
        let config: Configuration = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(1, config.compiler.len());
        assert_eq!(".cpp", config.compiler[0].ext);
        assert_eq!("/contest/house", config.environment.contest_house);
    }

    #[test]
    fn default_configuration_has_empty_compiler_table() {
        let config = default_configuration();
        assert!(config.compiler.is_empty());
        assert_eq!("./judge-work", config.environment.contest_house);
    }
}
