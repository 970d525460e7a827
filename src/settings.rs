use crate::capabilities::EnginePreference;
use crate::error::{Board2PdfError, Result};
use crate::template::RawSettings;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "board2pdf.config.toml";

/// Configuration compiled into the binary, used as the last fallback.
pub const BUILTIN_CONFIG: &str = include_str!("../default_config.toml");

pub const DEFAULT_PAGE_INFO: &str = "Board2Pdf: ${template_name} - Page ${page_nr}/${total_pages}";

/// Loaded export settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSettings {
    /// Output directory, relative paths are resolved against the board directory.
    pub output_dir: PathBuf,
    pub enabled_template_names: Vec<String>,
    pub templates: IndexMap<String, RawSettings>,
    pub create_svg: bool,
    pub delete_temp_files: bool,
    pub delete_single_page_files: bool,
    pub output_basename_suffix: String,
    /// Replaces `{base}{suffix}.pdf` as the assembly file name when set.
    pub assembly_file_output: Option<PathBuf>,
    pub page_info: String,
    /// Title block comment receiving `page_info`; 0 disables stamping.
    pub info_variable: u8,
    pub colorize_engine: EnginePreference,
    pub merge_engine: EnginePreference,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("plot"),
            enabled_template_names: Vec::new(),
            templates: IndexMap::new(),
            create_svg: false,
            delete_temp_files: true,
            delete_single_page_files: true,
            output_basename_suffix: "__Assembly".to_string(),
            assembly_file_output: None,
            page_info: DEFAULT_PAGE_INFO.to_string(),
            info_variable: 4,
            colorize_engine: EnginePreference::Auto,
            merge_engine: EnginePreference::Auto,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    main: MainSection,
    #[serde(default)]
    templates: IndexMap<String, RawSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MainSection {
    output_dest_dir: String,
    #[serde(deserialize_with = "name_list")]
    enabled_templates: Vec<String>,
    #[serde(deserialize_with = "name_list")]
    disabled_templates: Vec<String>,
    #[serde(deserialize_with = "loose_bool")]
    create_svg: bool,
    #[serde(deserialize_with = "loose_bool")]
    del_temp_files: bool,
    #[serde(deserialize_with = "loose_bool")]
    delete_single_page_files: bool,
    assembly_file_extension: String,
    assembly_file_output: Option<String>,
    page_info: String,
    #[serde(deserialize_with = "loose_u8")]
    info_variable: u8,
    /// Template map serialised as a JSON string, as older releases stored it.
    settings: Option<String>,
    colorize_lib: EnginePreference,
    merge_lib: EnginePreference,
}

impl Default for MainSection {
    fn default() -> Self {
        let d = ExportSettings::default();
        Self {
            output_dest_dir: "plot".to_string(),
            enabled_templates: Vec::new(),
            disabled_templates: Vec::new(),
            create_svg: d.create_svg,
            del_temp_files: d.delete_temp_files,
            delete_single_page_files: d.delete_single_page_files,
            assembly_file_extension: d.output_basename_suffix,
            assembly_file_output: None,
            page_info: d.page_info,
            info_variable: d.info_variable,
            settings: None,
            colorize_lib: EnginePreference::Auto,
            merge_lib: EnginePreference::Auto,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameList {
    List(Vec<String>),
    Joined(String),
}

fn name_list<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Vec<String>, D::Error> {
    let names = match NameList::deserialize(de)? {
        NameList::List(items) => items,
        NameList::Joined(text) => text.split(',').map(str::to_string).collect(),
    };
    Ok(names
        .into_iter()
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .collect())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseBool {
    Bool(bool),
    Text(String),
}

fn loose_bool<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<bool, D::Error> {
    Ok(match LooseBool::deserialize(de)? {
        LooseBool::Bool(b) => b,
        LooseBool::Text(t) => t.trim().eq_ignore_ascii_case("true"),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseU8 {
    Number(i64),
    Text(String),
}

fn loose_u8<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<u8, D::Error> {
    let value = match LooseU8::deserialize(de)? {
        LooseU8::Number(n) => n,
        LooseU8::Text(t) => t.trim().parse::<i64>().map_err(serde::de::Error::custom)?,
    };
    u8::try_from(value).map_err(serde::de::Error::custom)
}

impl ExportSettings {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(text)
            .map_err(|e| Board2PdfError::Config(format!("invalid settings file: {e}")))?;
        let main = file.main;

        let mut templates = file.templates;
        if let Some(json) = main.settings.as_deref() {
            let legacy: IndexMap<String, RawSettings> = serde_json::from_str(json)
                .map_err(|e| Board2PdfError::Config(format!("invalid [main] settings JSON: {e}")))?;
            for (name, raw) in legacy {
                templates.entry(name).or_insert(raw);
            }
        }

        if main.info_variable > 9 {
            return Err(Board2PdfError::Config(format!(
                "info_variable must be between 0 and 9, got {}",
                main.info_variable
            )));
        }

        let enabled: Vec<String> = main
            .enabled_templates
            .into_iter()
            .filter(|n| !main.disabled_templates.contains(n))
            .collect();
        for name in &enabled {
            if !templates.contains_key(name) {
                return Err(Board2PdfError::Config(format!(
                    "enabled template {name} has no settings"
                )));
            }
        }

        Ok(Self {
            output_dir: PathBuf::from(main.output_dest_dir),
            enabled_template_names: enabled,
            templates,
            create_svg: main.create_svg,
            delete_temp_files: main.del_temp_files,
            delete_single_page_files: main.delete_single_page_files,
            output_basename_suffix: main.assembly_file_extension,
            assembly_file_output: main.assembly_file_output.map(PathBuf::from),
            page_info: main.page_info,
            info_variable: main.info_variable,
            colorize_engine: main.colorize_lib,
            merge_engine: main.merge_lib,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Board2PdfError::io("load_settings", path, e))?;
        Self::from_toml_str(&text).map_err(|e| match e {
            Board2PdfError::Config(msg) => {
                Board2PdfError::Config(format!("{msg} (in {})", path.display()))
            }
            other => other,
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_CONFIG)
    }

    /// Output directory with `~` expanded and relative paths anchored at the
    /// board's directory.
    pub fn resolved_output_dir(&self, board_path: &Path) -> PathBuf {
        let expanded = expand_home(&self.output_dir);
        if expanded.is_absolute() {
            return expanded;
        }
        board_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|dir| dir.join(&expanded))
            .unwrap_or(expanded)
    }

    /// Page info text for page `page_nr` of `total_pages`.
    pub fn page_info_for(&self, template_name: &str, page_nr: usize, total_pages: usize) -> String {
        self.page_info
            .replace("${template_name}", template_name)
            .replace("${page_nr}", &page_nr.to_string())
            .replace("${total_pages}", &total_pages.to_string())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Where the settings came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    BuiltIn,
}

/// Board directory first, then the installation directory, then the
/// compiled-in default.
pub fn discover_config(board_path: &Path, install_dir: Option<&Path>) -> ConfigSource {
    let board_dir = board_path.parent().unwrap_or_else(|| Path::new("."));
    let local = board_dir.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return ConfigSource::File(local);
    }
    log::info!("{} not found, trying the global configuration", local.display());
    if let Some(dir) = install_dir {
        let global = dir.join(CONFIG_FILE_NAME);
        if global.is_file() {
            return ConfigSource::File(global);
        }
        log::info!("{} not found, using the built-in configuration", global.display());
    }
    ConfigSource::BuiltIn
}

impl ConfigSource {
    pub fn load(&self) -> Result<ExportSettings> {
        match self {
            ConfigSource::File(path) => ExportSettings::load(path),
            ConfigSource::BuiltIn => ExportSettings::builtin(),
        }
    }
}
