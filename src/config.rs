use crate::error::LifeboatError;
use crate::naming::sanitize_folder_name;
use crate::Result;
use configparser::ini::Ini;
use globset::Glob;
use std::fmt;
use std::path::{Path, PathBuf};

/// Default configuration filename looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "lifeboat.ini";

/// Name of the index document kept in the backup root
pub const INDEX_FILE: &str = "index.json";

const UNIT_SECTION_PREFIX: &str = "unit.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// An application deployment found under `deployments_path`
    Deployment,
    /// An auxiliary folder declared in a `[unit.<name>]` section
    Folder,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Deployment => "deployment",
            UnitKind::Folder => "folder",
        }
    }
}

/// A named source path that becomes one archive in a backup
#[derive(Debug, Clone, PartialEq)]
pub struct BackupUnit {
    pub name: String,
    pub path: PathBuf,
    pub required: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub kind: UnitKind,
}

impl BackupUnit {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            required: false,
            include: Vec::new(),
            exclude: Vec::new(),
            kind: UnitKind::Folder,
        }
    }

    pub fn deployment(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            required: true,
            kind: UnitKind::Deployment,
            ..Self::new(name, path)
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_include(mut self, patterns: &[&str]) -> Self {
        self.include = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_exclude(mut self, patterns: &[&str]) -> Self {
        self.exclude = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Filesystem-safe name used for the unit's archive and its top-level folder
    pub fn archive_stem(&self) -> String {
        sanitize_folder_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub days: u32,
    pub min_keep: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days: 30,
            min_keep: 5,
        }
    }
}

/// Which compression backend a deployment wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendPreference {
    /// Probe 7-Zip, then the streaming archiver, then the fallback archiver
    Auto,
    SevenZip,
    Streaming,
    Fallback,
}

impl BackendPreference {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" | "" => Some(Self::Auto),
            "7z" | "7zip" | "7-zip" | "sevenzip" => Some(Self::SevenZip),
            "zstd" | "tar.zst" | "streaming" => Some(Self::Streaming),
            "zip" | "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::SevenZip => "7z",
            Self::Streaming => "zstd",
            Self::Fallback => "zip",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub level: i32,
    pub backend: BackendPreference,
    pub skip_extensions: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: 6,
            backend: BackendPreference::Auto,
            skip_extensions: [
                ".war", ".jar", ".zip", ".gz", ".tgz", ".7z", ".rar", ".bz2", ".xz", ".zst",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl CompressionConfig {
    /// Level handed to the codecs, normalised to 1-9 with 5 as the balanced default
    pub fn effective_level(&self) -> i32 {
        if (1..=9).contains(&self.level) {
            self.level
        } else {
            5
        }
    }

    /// Whether a file with this name is already compressed and should be stored as-is
    pub fn should_skip(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.skip_extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SevenZipConfig {
    pub path: Option<PathBuf>,
    pub threads: u32,
}

impl Default for SevenZipConfig {
    fn default() -> Self {
        Self {
            path: None,
            threads: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub name: String,
    pub environment: String,
    pub backup_path: PathBuf,
    pub deployments_path: Option<PathBuf>,
    pub deployments: Vec<String>,
    pub temp_path: Option<PathBuf>,
    pub units: Vec<BackupUnit>,
    pub retention: RetentionConfig,
    pub compression: CompressionConfig,
    pub seven_zip: SevenZipConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "lifeboat".to_string(),
            environment: "production".to_string(),
            backup_path: PathBuf::from("."),
            deployments_path: None,
            deployments: Vec::new(),
            temp_path: None,
            units: Vec::new(),
            retention: RetentionConfig::default(),
            compression: CompressionConfig::default(),
            seven_zip: SevenZipConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Configuration rooted at `backup_path` with every other setting at its default
    pub fn with_backup_path(backup_path: impl Into<PathBuf>) -> Self {
        Self {
            backup_path: backup_path.into(),
            ..Self::default()
        }
    }

    /// Path of the backup index document
    pub fn index_path(&self) -> PathBuf {
        self.backup_path.join(INDEX_FILE)
    }

    /// Destination for a regular backup: `backup_path/YYYYMMDD/HHMM`
    pub fn backup_destination(&self, date: &str, time: &str) -> PathBuf {
        self.backup_path.join(date).join(time)
    }

    /// Destination for a checkpoint backup: `backup_path/YYYYMMDD_description`
    pub fn checkpoint_destination(&self, date: &str, description: &str) -> PathBuf {
        self.backup_path.join(format!("{date}_{description}"))
    }

    /// Validate the configuration, collecting errors and warnings
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.name.trim().is_empty() {
            result.add_error("name", "instance name is required");
        }

        if self.backup_path.as_os_str().is_empty() {
            result.add_error("backup_path", "backup path is required");
        }

        match &self.deployments_path {
            Some(path) if !path.exists() => {
                result.add_error(
                    "deployments_path",
                    format!("path does not exist: {}", path.display()),
                );
            }
            Some(path) => {
                for name in &self.deployments {
                    if !path.join(name).exists() {
                        result.add_warning(format!(
                            "deployment '{name}' does not exist at {}",
                            path.join(name).display()
                        ));
                    }
                }
            }
            None => {
                if !self.deployments.is_empty() {
                    result.add_error(
                        "deployments_path",
                        "deployments are listed but deployments_path is not set",
                    );
                }
            }
        }

        if self.deployments_path.is_none() && self.units.is_empty() {
            result.add_warning("No deployments_path and no [unit.*] sections; nothing to back up");
        }

        for unit in &self.units {
            let field = format!("unit.{}", unit.name);
            if unit.name.trim().is_empty() {
                result.add_error(&field, "unit name is required");
            }
            if unit.path.as_os_str().is_empty() {
                result.add_error(format!("{field}.path"), "unit path is required");
            } else if !unit.path.exists() {
                if unit.required {
                    result.add_error(
                        format!("{field}.path"),
                        format!("required folder does not exist: {}", unit.path.display()),
                    );
                } else {
                    result.add_warning(format!(
                        "optional unit '{}' does not exist: {}",
                        unit.name,
                        unit.path.display()
                    ));
                }
            }
            for pattern in unit.include.iter().chain(unit.exclude.iter()) {
                if let Err(e) = Glob::new(pattern) {
                    result.add_error(&field, format!("invalid pattern '{pattern}': {e}"));
                }
            }
        }

        if self.retention.enabled {
            if self.retention.days < 1 {
                result.add_error("retention.days", "retention days must be at least 1");
            }
        }

        if self.compression.enabled && !(1..=9).contains(&self.compression.level) {
            result.add_error(
                "compression.level",
                "compression level must be between 1 and 9",
            );
        }

        const VALID_ENVIRONMENTS: &[&str] = &[
            "development",
            "dev",
            "staging",
            "stage",
            "production",
            "prod",
            "testing",
            "test",
        ];
        if !self.environment.is_empty()
            && !VALID_ENVIRONMENTS.contains(&self.environment.to_lowercase().as_str())
        {
            result.add_warning(format!(
                "unrecognized environment '{}'; consider using: dev, staging, production, testing",
                self.environment
            ));
        }

        result
    }

    /// Fail with a configuration error when validation finds any errors
    pub fn ensure_valid(&self) -> Result<()> {
        let result = self.validate();
        if result.valid {
            return Ok(());
        }
        let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
        Err(LifeboatError::config(format!(
            "configuration validation failed: {}",
            messages.join("; ")
        )))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            writeln!(f, "Configuration is valid")?;
        } else {
            writeln!(f, "Configuration has errors:")?;
            for error in &self.errors {
                writeln!(f, "  x {error}")?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  ! {warning}")?;
            }
        }
        Ok(())
    }
}

/// Get default configuration
pub fn default_config() -> Config {
    Config::default()
}

/// Load configuration from the given file, or from the first file found in the
/// default locations, falling back to defaults when none exists
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    match find_config_path(explicit)? {
        Some(path) => load_config_file(&path),
        None => Ok(default_config()),
    }
}

/// Load configuration from a specific INI file
pub fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LifeboatError::config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    parse_config(&content, &base_dir)
}

/// Parse INI content; relative paths are resolved against `base_dir`
pub fn parse_config(content: &str, base_dir: &Path) -> Result<Config> {
    let mut conf = Ini::new_cs();
    conf.read(content.to_string())
        .map_err(|e| LifeboatError::config(format!("Failed to parse config file: {e}")))?;

    let mut config = default_config();

    if let Some(value) = get_value(&conf, "lifeboat", "name") {
        config.name = value;
    }
    if let Some(value) = get_value(&conf, "lifeboat", "environment") {
        config.environment = value;
    }
    if let Some(value) = get_value(&conf, "lifeboat", "backup_path") {
        config.backup_path = PathBuf::from(value);
    }
    if let Some(value) = get_value(&conf, "lifeboat", "deployments_path") {
        config.deployments_path = Some(PathBuf::from(value));
    }
    if let Some(value) = get_value(&conf, "lifeboat", "deployments") {
        config.deployments = parse_list(&value);
    }
    if let Some(value) = get_value(&conf, "lifeboat", "temp_path") {
        config.temp_path = Some(PathBuf::from(value));
    }

    if let Some(value) = get_value(&conf, "retention", "enabled") {
        config.retention.enabled = parse_bool(&value).unwrap_or(config.retention.enabled);
    }
    if let Some(value) = get_value(&conf, "retention", "days") {
        config.retention.days = parse_number(&value, "retention.days")?;
    }
    if let Some(value) = get_value(&conf, "retention", "min_keep") {
        config.retention.min_keep = parse_number(&value, "retention.min_keep")?;
    }

    if let Some(value) = get_value(&conf, "compression", "enabled") {
        config.compression.enabled = parse_bool(&value).unwrap_or(config.compression.enabled);
    }
    if let Some(value) = get_value(&conf, "compression", "level") {
        config.compression.level = parse_number(&value, "compression.level")?;
    }
    if let Some(value) = get_value(&conf, "compression", "backend") {
        config.compression.backend = BackendPreference::parse(&value)
            .ok_or_else(|| LifeboatError::config(format!("Invalid compression backend: {value}")))?;
    }
    if let Some(value) = get_value(&conf, "compression", "skip_extensions") {
        config.compression.skip_extensions = parse_list(&value);
    }

    if let Some(value) = get_value(&conf, "seven_zip", "path") {
        config.seven_zip.path = Some(PathBuf::from(value));
    }
    if let Some(value) = get_value(&conf, "seven_zip", "threads") {
        config.seven_zip.threads = parse_number(&value, "seven_zip.threads")?;
    }

    if let Some(value) = get_value(&conf, "logging", "level") {
        config.logging.level = value;
    }
    if let Some(value) = get_value(&conf, "logging", "path") {
        config.logging.path = Some(PathBuf::from(value));
    }

    let mut sections = conf.sections();
    sections.sort();
    for section in sections {
        let Some(name) = section.strip_prefix(UNIT_SECTION_PREFIX) else {
            continue;
        };
        let path = get_value(&conf, &section, "path").unwrap_or_default();
        let mut unit = BackupUnit::new(name, path);
        if let Some(value) = get_value(&conf, &section, "required") {
            unit.required = parse_bool(&value).unwrap_or(false);
        }
        if let Some(value) = get_value(&conf, &section, "include") {
            unit.include = parse_list(&value);
        }
        if let Some(value) = get_value(&conf, &section, "exclude") {
            unit.exclude = parse_list(&value);
        }
        config.units.push(unit);
    }

    config.resolve_paths(base_dir);
    Ok(config)
}

impl Config {
    /// Convert relative paths to absolute paths based on the config directory
    fn resolve_paths(&mut self, base_dir: &Path) {
        if self.backup_path.as_os_str().is_empty() || self.backup_path == Path::new(".") {
            self.backup_path = base_dir.to_path_buf();
        } else if self.backup_path.is_relative() {
            self.backup_path = base_dir.join(&self.backup_path);
        }

        for path in [&mut self.temp_path, &mut self.logging.path]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}

fn get_value(conf: &Ini, section: &str, key: &str) -> Option<String> {
    conf.get(section, key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| LifeboatError::config(format!("Invalid {field}: {value}")))
}

/// Split a comma-separated INI value into trimmed, non-empty items
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a boolean value from INI string
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Find the configuration file to load: the explicit path, `./lifeboat.ini`,
/// then the platform config directory
pub fn find_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(LifeboatError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Ok(Some(local));
    }

    Ok(platform_config_path().filter(|p| p.exists()))
}

/// Get the configuration file path for the current platform
fn platform_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return Some(PathBuf::from(appdata).join("lifeboat").join("config.ini"));
        }
    }

    if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
        Some(PathBuf::from(config_dir).join("lifeboat").join("config.ini"))
    } else {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("lifeboat")
                .join("config.ini")
        })
    }
}

/// Create a sample configuration file
pub fn create_sample_config() -> String {
    r#"[lifeboat]
# Instance name shown in summaries
name = my-webapp
environment = production

# Where backups and index.json live (relative paths resolve against this file)
backup_path = ./backups

# Directory holding application deployments; every folder or .war becomes a unit
deployments_path = /opt/tomcat/webapps
# Restrict to these deployments (comma separated, empty = all)
deployments =

[retention]
enabled = true
days = 30
min_keep = 5

[compression]
enabled = true
level = 6
# auto, 7z, zstd or zip
backend = auto
skip_extensions = .war, .jar, .zip, .gz, .tgz, .7z, .rar, .bz2, .xz, .zst

[seven_zip]
# Leave empty to search PATH
path =
threads = 1

[logging]
level = info
path = ./logs/lifeboat.log

[unit.tomcat-conf]
path = /opt/tomcat/conf
required = true
include = *.xml, *.properties
exclude = *.log, temp/**
"#
    .to_string()
}

/// Display the current configuration in a user-friendly format
pub fn dump_config(config: &Config, source: Option<&Path>) {
    println!("lifeboat Configuration");
    println!("======================");
    println!();

    match source {
        Some(path) => println!("Config file: {} (found)", path.display()),
        None => println!("Config file: (not found, using defaults)"),
    }
    println!();

    println!("name               = {}", config.name);
    println!("environment        = {}", config.environment);
    println!("backup_path        = {}", config.backup_path.display());
    match &config.deployments_path {
        Some(path) => println!("deployments_path   = {}", path.display()),
        None => println!("deployments_path   = (not set)"),
    }
    println!("deployments        = {}", config.deployments.join(", "));
    println!(
        "retention          = enabled={} days={} min_keep={}",
        config.retention.enabled, config.retention.days, config.retention.min_keep
    );
    println!(
        "compression        = enabled={} level={} backend={}",
        config.compression.enabled,
        config.compression.level,
        config.compression.backend.as_str()
    );
    println!("logging.level      = {}", config.logging.level);
    println!();

    if config.units.is_empty() {
        println!("Units: (none)");
    } else {
        println!("Units:");
        for unit in &config.units {
            println!(
                "  {:<20} {} {}",
                unit.name,
                unit.path.display(),
                if unit.required { "(required)" } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = default_config();
        assert_eq!(config.name, "lifeboat");
        assert!(config.retention.enabled);
        assert_eq!(config.retention.days, 30);
        assert_eq!(config.retention.min_keep, 5);
        assert!(config.compression.enabled);
        assert_eq!(config.compression.level, 6);
        assert_eq!(config.compression.backend, BackendPreference::Auto);
        assert_eq!(config.seven_zip.threads, 1);
        assert!(config.units.is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("a, b ,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_list(" , ,"), Vec::<String>::new());
        assert_eq!(parse_list("*.log"), vec!["*.log"]);
    }

    #[test]
    fn test_backend_preference_parse() {
        assert_eq!(BackendPreference::parse("auto"), Some(BackendPreference::Auto));
        assert_eq!(BackendPreference::parse("7z"), Some(BackendPreference::SevenZip));
        assert_eq!(BackendPreference::parse("ZSTD"), Some(BackendPreference::Streaming));
        assert_eq!(BackendPreference::parse("zip"), Some(BackendPreference::Fallback));
        assert_eq!(BackendPreference::parse("rar"), None);
    }

    #[test]
    fn test_parse_config_full() {
        let content = r#"[lifeboat]
name = billing
environment = staging
backup_path = backups
deployments_path = /opt/tomcat/webapps
deployments = api, web
temp_path = scratch

[retention]
enabled = false
days = 14
min_keep = 3

[compression]
level = 9
backend = zip
skip_extensions = .jar, .war

[seven_zip]
path = /usr/local/bin/7zz
threads = 4

[logging]
level = debug
path = logs/lifeboat.log

[unit.Tomcat Conf]
path = /opt/tomcat/conf
required = yes
include = *.xml, *.properties
exclude = *.log
"#;
        let config = parse_config(content, Path::new("/etc/lifeboat")).unwrap();

        assert_eq!(config.name, "billing");
        assert_eq!(config.environment, "staging");
        assert_eq!(config.backup_path, PathBuf::from("/etc/lifeboat/backups"));
        assert_eq!(config.temp_path, Some(PathBuf::from("/etc/lifeboat/scratch")));
        assert_eq!(
            config.deployments_path,
            Some(PathBuf::from("/opt/tomcat/webapps"))
        );
        assert_eq!(config.deployments, vec!["api", "web"]);
        assert!(!config.retention.enabled);
        assert_eq!(config.retention.days, 14);
        assert_eq!(config.retention.min_keep, 3);
        assert_eq!(config.compression.level, 9);
        assert_eq!(config.compression.backend, BackendPreference::Fallback);
        assert_eq!(config.compression.skip_extensions, vec![".jar", ".war"]);
        assert_eq!(config.seven_zip.path, Some(PathBuf::from("/usr/local/bin/7zz")));
        assert_eq!(config.seven_zip.threads, 4);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.path,
            Some(PathBuf::from("/etc/lifeboat/logs/lifeboat.log"))
        );

        assert_eq!(config.units.len(), 1);
        let unit = &config.units[0];
        assert_eq!(unit.name, "Tomcat Conf");
        assert_eq!(unit.path, PathBuf::from("/opt/tomcat/conf"));
        assert!(unit.required);
        assert_eq!(unit.include, vec!["*.xml", "*.properties"]);
        assert_eq!(unit.exclude, vec!["*.log"]);
        assert_eq!(unit.kind, UnitKind::Folder);
        assert_eq!(unit.archive_stem(), "tomcat_conf");
    }

    #[test]
    fn test_parse_config_dot_backup_path_uses_config_dir() {
        let config = parse_config("[lifeboat]\nbackup_path = .\n", Path::new("/srv/app")).unwrap();
        assert_eq!(config.backup_path, PathBuf::from("/srv/app"));
        assert_eq!(config.index_path(), PathBuf::from("/srv/app/index.json"));
    }

    #[test]
    fn test_parse_config_invalid_number() {
        let result = parse_config("[retention]\ndays = forever\n", Path::new("/tmp"));
        assert!(matches!(result, Err(LifeboatError::Config { .. })));
    }

    #[test]
    fn test_parse_config_invalid_backend() {
        let result = parse_config("[compression]\nbackend = rar\n", Path::new("/tmp"));
        assert!(matches!(result, Err(LifeboatError::Config { .. })));
    }

    #[test]
    fn test_sample_config_parses() {
        let config = parse_config(&create_sample_config(), Path::new("/etc/lifeboat")).unwrap();
        assert_eq!(config.name, "my-webapp");
        assert_eq!(config.units.len(), 1);
        assert_eq!(config.units[0].name, "tomcat-conf");
        assert!(config.deployments.is_empty());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lifeboat.ini");
        fs::write(&path, "[lifeboat]\nname = from-file\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.name, "from-file");
        assert_eq!(config.backup_path, dir.path().to_path_buf());
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let dir = tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("missing.ini")));
        assert!(matches!(result, Err(LifeboatError::Config { .. })));
    }

    #[test]
    fn test_destinations() {
        let config = Config::with_backup_path("/backups");
        assert_eq!(
            config.backup_destination("20250101", "1200"),
            PathBuf::from("/backups/20250101/1200")
        );
        assert_eq!(
            config.checkpoint_destination("20250101", "release"),
            PathBuf::from("/backups/20250101_release")
        );
    }

    #[test]
    fn test_should_skip_extensions() {
        let compression = CompressionConfig::default();
        assert!(compression.should_skip("app.WAR"));
        assert!(compression.should_skip("data.tar.gz"));
        assert!(!compression.should_skip("server.xml"));
    }

    #[test]
    fn test_effective_level() {
        let mut compression = CompressionConfig::default();
        assert_eq!(compression.effective_level(), 6);
        compression.level = 0;
        assert_eq!(compression.effective_level(), 5);
        compression.level = 12;
        assert_eq!(compression.effective_level(), 5);
    }

    #[test]
    fn test_validate_valid_config() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_backup_path(dir.path());
        config.units.push(BackupUnit::new("conf", dir.path()).required(true));

        let result = config.validate();
        assert!(result.valid, "{result}");
        assert!(config.ensure_valid().is_ok());
    }

    #[test]
    fn test_validate_reports_errors_and_warnings() {
        let dir = tempdir().unwrap();
        let mut config = Config::with_backup_path(dir.path());
        config.name = " ".to_string();
        config.environment = "moon".to_string();
        config.retention.days = 0;
        config.compression.level = 11;
        config.units.push(BackupUnit::new("required", dir.path().join("nope")).required(true));
        config.units.push(BackupUnit::new("optional", dir.path().join("nope")));
        config
            .units
            .push(BackupUnit::new("patterns", dir.path()).with_include(&["[unclosed"]));

        let result = config.validate();
        assert!(!result.valid);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"retention.days"));
        assert!(fields.contains(&"compression.level"));
        assert!(fields.contains(&"unit.required.path"));
        assert!(fields.contains(&"unit.patterns"));
        assert!(result.warnings.iter().any(|w| w.contains("optional")));
        assert!(result.warnings.iter().any(|w| w.contains("moon")));

        let rendered = result.to_string();
        assert!(rendered.contains("Configuration has errors"));
        assert!(matches!(
            config.ensure_valid(),
            Err(LifeboatError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_deployments_without_path() {
        let mut config = Config::with_backup_path("/backups");
        config.deployments = vec!["api".to_string()];
        let result = config.validate();
        assert!(result
            .errors
            .iter()
            .any(|e| e.field == "deployments_path"));
    }
}
