//! Per-language usage patterns for dependency confirmation.
//!
//! The registry is plain data: a language owns its file extensions and an
//! ordered list of rules. Built-in rules cover the common dynamic-load APIs and
//! interop declarations; more rules (or whole languages) come from config via
//! [`PatternRuleSpec`].

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Confidence;

/// How a rule's captured text is compared against a candidate library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Normalized captured stem equals the candidate stem. A captured
    /// extension must match the candidate's (`.lib` matches any).
    Exact,
    /// Normalized captured text contains the candidate stem, with the same
    /// extension rule as `Exact`.
    Contains,
    /// Candidate file name appears verbatim anywhere; the rule carries no regex.
    Literal,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Contains => "contains",
            MatchMode::Literal => "literal",
        }
    }
}

fn default_mode() -> MatchMode {
    MatchMode::Exact
}

/// Serializable rule definition, as found in a scan config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRuleSpec {
    pub id: String,
    pub language: String,
    /// Required when `language` is not already registered.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: MatchMode,
    pub confidence: Confidence,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("Pattern '{id}' has an invalid regex: {source}")]
    InvalidRegex {
        id: String,
        #[source]
        source: regex::Error,
    },
    #[error("Pattern '{0}' needs a regex with a capture group for the library name")]
    MissingCapture(String),
    #[error("Duplicate pattern id '{0}'")]
    DuplicateId(String),
    #[error("Language '{0}' is not built in and needs at least one file extension")]
    MissingExtensions(String),
}

/// Compiled rule. Read-only once the registry is built.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub id: String,
    pub language: String,
    pub mode: MatchMode,
    pub confidence: Confidence,
    pub description: String,
    regex: Option<Regex>,
}

impl PatternRule {
    fn compile(spec: &PatternRuleSpec) -> Result<Self, PatternError> {
        let regex = match (&spec.regex, spec.mode) {
            (_, MatchMode::Literal) => None,
            (None, _) => return Err(PatternError::MissingCapture(spec.id.clone())),
            (Some(pattern), _) => {
                let regex = Regex::new(pattern).map_err(|source| PatternError::InvalidRegex {
                    id: spec.id.clone(),
                    source,
                })?;
                if regex.captures_len() < 2 {
                    return Err(PatternError::MissingCapture(spec.id.clone()));
                }
                Some(regex)
            }
        };
        Ok(Self {
            id: spec.id.clone(),
            language: spec.language.clone(),
            mode: spec.mode,
            confidence: spec.confidence,
            description: spec.description.clone(),
            regex,
        })
    }

    /// Compiled regex; `None` for literal rules.
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    pub fn pattern(&self) -> Option<&str> {
        self.regex.as_ref().map(Regex::as_str)
    }
}

/// A source language: its extensions and ordered rules.
#[derive(Debug, Clone)]
pub struct Language {
    pub id: String,
    pub name: String,
    pub extensions: Vec<String>,
    pub rules: Vec<PatternRule>,
}

/// Language -> rules table shared read-only by confirmation tasks.
#[derive(Debug, Clone, Default)]
pub struct PatternRegistry {
    languages: Vec<Language>,
}

impl PatternRegistry {
    /// Registry holding only the built-in languages.
    pub fn builtin() -> Result<Self, PatternError> {
        let mut registry = Self::default();
        for lang in BUILTIN_LANGUAGES {
            registry.languages.push(Language {
                id: lang.id.to_string(),
                name: lang.name.to_string(),
                extensions: lang.extensions.iter().map(|e| e.to_string()).collect(),
                rules: Vec::new(),
            });
            for (suffix, regex, mode, confidence, description) in lang.rules {
                registry.add(&PatternRuleSpec {
                    id: format!("{}.{}", lang.id, suffix),
                    language: lang.id.to_string(),
                    extensions: Vec::new(),
                    regex: Some(regex.to_string()),
                    mode: *mode,
                    confidence: *confidence,
                    description: description.to_string(),
                })?;
            }
            registry.add(&PatternRuleSpec {
                id: format!("{}.literal", lang.id),
                language: lang.id.to_string(),
                extensions: Vec::new(),
                regex: None,
                mode: MatchMode::Literal,
                confidence: Confidence::Low,
                description: "library file name appears verbatim".to_string(),
            })?;
        }
        Ok(registry)
    }

    /// Built-ins plus `extra` rules merged in order.
    pub fn with_extra(extra: &[PatternRuleSpec]) -> Result<Self, PatternError> {
        let mut registry = Self::builtin()?;
        for spec in extra {
            registry.add(spec)?;
        }
        Ok(registry)
    }

    /// Compile and append one rule, creating its language if needed.
    pub fn add(&mut self, spec: &PatternRuleSpec) -> Result<&mut Self, PatternError> {
        if self.rules().any(|rule| rule.id == spec.id) {
            return Err(PatternError::DuplicateId(spec.id.clone()));
        }
        let rule = PatternRule::compile(spec)?;
        let extensions = spec.extensions.iter().map(|e| normalize_extension(e));
        match self.languages.iter_mut().find(|l| l.id == spec.language) {
            Some(language) => {
                for ext in extensions {
                    if !language.extensions.contains(&ext) {
                        language.extensions.push(ext);
                    }
                }
                language.rules.push(rule);
            }
            None => {
                let extensions: Vec<String> = extensions.collect();
                if extensions.is_empty() {
                    return Err(PatternError::MissingExtensions(spec.language.clone()));
                }
                self.languages.push(Language {
                    id: spec.language.clone(),
                    name: spec.language.clone(),
                    extensions,
                    rules: vec![rule],
                });
            }
        }
        Ok(self)
    }

    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn rules(&self) -> impl Iterator<Item = &PatternRule> {
        self.languages.iter().flat_map(|l| l.rules.iter())
    }

    /// Language whose extension list covers `path`; first registered wins.
    pub fn language_for_path(&self, path: &Path) -> Option<&Language> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.languages.iter().find(|l| l.extensions.iter().any(|e| *e == ext))
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

type BuiltinRule = (&'static str, &'static str, MatchMode, Confidence, &'static str);

struct BuiltinLanguage {
    id: &'static str,
    name: &'static str,
    extensions: &'static [&'static str],
    rules: &'static [BuiltinRule],
}

const BUILTIN_LANGUAGES: &[BuiltinLanguage] = &[
    BuiltinLanguage {
        id: "c",
        name: "C/C++",
        extensions: &["c", "cc", "cpp", "cxx", "h", "hh", "hpp", "hxx"],
        rules: &[
            (
                "load_library",
                r#"\bLoadLibrary(?:Ex)?[AW]?\s*\(\s*(?:L|TEXT\s*\(\s*|_T\s*\(\s*)?"([^"\r\n]+)""#,
                MatchMode::Exact,
                Confidence::High,
                "LoadLibrary call with a string literal",
            ),
            (
                "get_module_handle",
                r#"\bGetModuleHandle[AW]?\s*\(\s*(?:L|TEXT\s*\(\s*|_T\s*\(\s*)?"([^"\r\n]+)""#,
                MatchMode::Exact,
                Confidence::High,
                "GetModuleHandle call with a string literal",
            ),
            (
                "pragma_lib",
                r#"#\s*pragma\s+comment\s*\(\s*lib\s*,\s*"([^"\r\n]+)""#,
                MatchMode::Contains,
                Confidence::Medium,
                "#pragma comment(lib) link directive",
            ),
            (
                "delay_load",
                r#"/DELAYLOAD:\s*"?([^"\s)]+)"#,
                MatchMode::Contains,
                Confidence::Medium,
                "/DELAYLOAD linker option",
            ),
        ],
    },
    BuiltinLanguage {
        id: "csharp",
        name: "C#",
        extensions: &["cs"],
        rules: &[
            (
                "load_library",
                r#"\b(?:NativeLibrary\.(?:Try)?Load|LoadLibrary(?:Ex)?[AW]?)\s*\(\s*@?"([^"\r\n]+)""#,
                MatchMode::Exact,
                Confidence::High,
                "NativeLibrary.Load or LoadLibrary with a string literal",
            ),
            (
                "dll_import",
                r#"\[\s*(?:[\w.]+\.)?(?:DllImport|LibraryImport)(?:Attribute)?\s*\(\s*@?"([^"\r\n]+)""#,
                MatchMode::Contains,
                Confidence::Medium,
                "[DllImport]/[LibraryImport] interop declaration",
            ),
        ],
    },
    BuiltinLanguage {
        id: "vb",
        name: "Visual Basic",
        extensions: &["vb", "bas", "cls", "frm", "vbs"],
        rules: &[
            (
                "load_library",
                r#"(?i)\bLoadLibrary(?:Ex)?[AW]?\s*\(\s*"([^"\r\n]+)""#,
                MatchMode::Exact,
                Confidence::High,
                "LoadLibrary call with a string literal",
            ),
            (
                "declare",
                r#"(?i)\bDeclare\s+(?:PtrSafe\s+)?(?:Ansi\s+|Unicode\s+|Auto\s+)?(?:Function|Sub)\s+\w+\s+Lib\s+"([^"\r\n]+)""#,
                MatchMode::Contains,
                Confidence::Medium,
                "Declare ... Lib interop declaration",
            ),
            (
                "dll_import",
                r#"(?i)<\s*DllImport\s*\(\s*"([^"\r\n]+)""#,
                MatchMode::Contains,
                Confidence::Medium,
                "<DllImport> interop declaration",
            ),
        ],
    },
    BuiltinLanguage {
        id: "python",
        name: "Python",
        extensions: &["py", "pyw"],
        rules: &[
            (
                "ctypes_load",
                r#"\b(?:(?:cdll|windll|oledll)\.LoadLibrary|CDLL|WinDLL|OleDLL|PyDLL)\s*\(\s*[rbu]?["']([^"'\r\n]+)["']"#,
                MatchMode::Exact,
                Confidence::High,
                "ctypes library load with a string literal",
            ),
            (
                "dlopen",
                r#"\.dlopen\s*\(\s*[rbu]?["']([^"'\r\n]+)["']"#,
                MatchMode::Exact,
                Confidence::High,
                "cffi dlopen with a string literal",
            ),
            (
                "ctypes_attribute",
                r#"\b(?:windll|cdll|oledll)\.(\w+)"#,
                MatchMode::Contains,
                Confidence::Medium,
                "ctypes loader attribute access",
            ),
        ],
    },
    BuiltinLanguage {
        id: "rust",
        name: "Rust",
        extensions: &["rs"],
        rules: &[
            (
                "libloading",
                r#"\bLibrary::new\s*\(\s*r?#*"([^"\r\n]+)""#,
                MatchMode::Exact,
                Confidence::High,
                "libloading Library::new with a string literal",
            ),
            (
                "link_attr",
                r#"#\[\s*link\s*\(\s*name\s*=\s*"([^"\r\n]+)""#,
                MatchMode::Contains,
                Confidence::Medium,
                "#[link(name = ...)] attribute",
            ),
        ],
    },
    BuiltinLanguage {
        id: "go",
        name: "Go",
        extensions: &["go"],
        rules: &[(
            "load_dll",
            r#"\b(?:syscall|windows)\.(?:NewLazyDLL|NewLazySystemDLL|LoadDLL|MustLoadDLL|LoadLibrary)\s*\(\s*"([^"\r\n]+)""#,
            MatchMode::Exact,
            Confidence::High,
            "syscall/windows DLL loader with a string literal",
        )],
    },
    BuiltinLanguage {
        id: "java",
        name: "Java/Kotlin",
        extensions: &["java", "kt", "kts"],
        rules: &[
            (
                "load_library",
                r#"\bSystem\.load(?:Library)?\s*\(\s*"([^"\r\n]+)""#,
                MatchMode::Exact,
                Confidence::High,
                "System.load/loadLibrary with a string literal",
            ),
            (
                "jna",
                r#"\bNative\.(?:load|loadLibrary)\s*\(\s*"([^"\r\n]+)""#,
                MatchMode::Contains,
                Confidence::Medium,
                "JNA Native.load binding",
            ),
        ],
    },
    BuiltinLanguage {
        id: "javascript",
        name: "JavaScript/TypeScript",
        extensions: &["js", "mjs", "cjs", "ts", "mts", "cts"],
        rules: &[
            (
                "process_dlopen",
                r#"\bprocess\.dlopen\s*\(\s*[^,]+,\s*["'`]([^"'`\r\n]+)["'`]"#,
                MatchMode::Exact,
                Confidence::High,
                "process.dlopen with a string literal",
            ),
            (
                "ffi",
                r#"\b(?:ffi\.Library|koffi\.load)\s*\(\s*["'`]([^"'`\r\n]+)["'`]"#,
                MatchMode::Contains,
                Confidence::Medium,
                "ffi-napi / koffi binding",
            ),
        ],
    },
    BuiltinLanguage {
        id: "pascal",
        name: "Delphi/Pascal",
        extensions: &["pas", "dpr", "dpk", "pp", "lpr"],
        rules: &[
            (
                "load_library",
                r#"(?i)\b(?:SafeLoadLibrary|LoadLibrary(?:Ex)?[AW]?|LoadPackage)\s*\(\s*'([^'\r\n]+)'"#,
                MatchMode::Exact,
                Confidence::High,
                "LoadLibrary call with a string literal",
            ),
            (
                "external",
                r#"(?i)\bexternal\s+'([^'\r\n]+)'"#,
                MatchMode::Contains,
                Confidence::Medium,
                "external '...' import declaration",
            ),
        ],
    },
    BuiltinLanguage {
        id: "powershell",
        name: "PowerShell",
        extensions: &["ps1", "psm1"],
        rules: &[
            (
                "assembly_load",
                r#"(?i)\[\s*(?:System\.)?Reflection\.Assembly\s*\]::Load(?:File|From)\s*\(\s*["']([^"'\r\n]+)["']"#,
                MatchMode::Exact,
                Confidence::High,
                "Assembly::LoadFile/LoadFrom with a string literal",
            ),
            (
                "dll_import",
                r#"\[\s*DllImport\s*\(\s*\\?"([^"\\\r\n]+)\\?""#,
                MatchMode::Contains,
                Confidence::Medium,
                "[DllImport] inside Add-Type source",
            ),
        ],
    },
];
