//! Configuration loading (C8): the INI file naming the item catalog,
//! database coordinates, and calibration tuning constants.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// `DATABASE.engine` — SQLite is the only engine implemented, matching the
/// source's `DatabaseFactory` (`SPEC_FULL.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseEngine {
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    /// For the SQLite engine, the `<name>.db` file stem.
    pub name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ParametersConfig {
    pub t_init: u64,
    pub t_inc: u64,
    pub t_inc_stable: u64,
    pub n: u64,
    pub anomaly_weight_threshold: u32,
}

/// Loaded, validated configuration.
///
/// Loading is eager and fatal: a missing file, an unparsable file, or a
/// missing/malformed key aborts startup with a `ConfigError`.
#[derive(Debug, Clone)]
pub struct Config {
    pub item_list: PathBuf,
    pub database: DatabaseConfig,
    pub parameters: ParametersConfig,
}

impl Config {
    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        let ini = ini::Ini::load_from_file(path)
            .map_err(|e| Error::Config(format!("cannot read config file {}: {e}", path.display())))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &ini::Ini) -> Result<Self> {
        let default_section = ini
            .section(Some("DEFAULT"))
            .ok_or_else(|| Error::Config("missing [DEFAULT] section".to_string()))?;
        let item_list = get_str(default_section, "DEFAULT", "item_list")?;

        let database_section = ini
            .section(Some("DATABASE"))
            .ok_or_else(|| Error::Config("missing [DATABASE] section".to_string()))?;
        let engine_str = get_str(database_section, "DATABASE", "engine")?;
        let engine = match engine_str.as_str() {
            "sqlite" => DatabaseEngine::Sqlite,
            other => {
                return Err(Error::Config(format!(
                    "unsupported database engine '{other}' (only 'sqlite' is implemented)"
                )));
            }
        };
        let database = DatabaseConfig {
            engine,
            host: get_str(database_section, "DATABASE", "host")?,
            port: get_str(database_section, "DATABASE", "port")?,
            user: get_str(database_section, "DATABASE", "user")?,
            password: get_str(database_section, "DATABASE", "password")?,
            name: get_str(database_section, "DATABASE", "name")?,
        };

        let params_section = ini
            .section(Some("PARAMETERS"))
            .ok_or_else(|| Error::Config("missing [PARAMETERS] section".to_string()))?;
        let parameters = ParametersConfig {
            t_init: get_u64(params_section, "PARAMETERS", "t_init")?,
            t_inc: get_u64(params_section, "PARAMETERS", "t_inc")?,
            t_inc_stable: get_u64(params_section, "PARAMETERS", "t_inc_stable")?,
            n: get_u64(params_section, "PARAMETERS", "n")?,
            anomaly_weight_threshold: get_u64(params_section, "PARAMETERS", "anomaly_weight_threshold")?
                as u32,
        };
        if parameters.t_inc == 0 || parameters.t_inc_stable % parameters.t_inc != 0 {
            return Err(Error::Config(
                "PARAMETERS.t_inc_stable must be a positive multiple of PARAMETERS.t_inc".to_string(),
            ));
        }

        Ok(Self {
            item_list: PathBuf::from(item_list),
            database,
            parameters,
        })
    }
}

fn get_str(section: &ini::Properties, section_name: &str, key: &str) -> Result<String> {
    section
        .get(key)
        .map(str::to_string)
        .ok_or_else(|| Error::Config(format!("missing key '{key}' in section [{section_name}]")))
}

fn get_u64(section: &ini::Properties, section_name: &str, key: &str) -> Result<u64> {
    let raw = get_str(section, section_name, key)?;
    raw.parse::<u64>()
        .map_err(|_| Error::Config(format!("key '{key}' in section [{section_name}] is not a valid integer: '{raw}'")))
}
