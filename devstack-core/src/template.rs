//! Typed path templates.
//!
//! A template is parsed once, when the catalog is built. Unknown
//! placeholders and unbalanced braces are rejected at that point, and
//! rendering fails if any placeholder the template declares was not
//! supplied, so a malformed path never reaches the filesystem.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A named input a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placeholder {
    /// `{root}`: the devstack data root
    Root,
    /// `{version_full}`: full bundle version, e.g. `8.3.4`
    VersionFull,
    /// `{instance_id}`: opaque key of a service instance
    InstanceId,
}

impl Placeholder {
    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Root => "root",
            Placeholder::VersionFull => "version_full",
            Placeholder::InstanceId => "instance_id",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "root" => Some(Placeholder::Root),
            "version_full" => Some(Placeholder::VersionFull),
            "instance_id" => Some(Placeholder::InstanceId),
            _ => None,
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template '{template}' references unknown placeholder '{{{name}}}'")]
    UnknownPlaceholder { template: String, name: String },

    #[error("template '{template}' has an unterminated placeholder")]
    Unterminated { template: String },

    #[error("template '{template}' requires {placeholder} but it was not supplied")]
    Missing {
        template: String,
        placeholder: Placeholder,
    },

    #[error("template '{template}' rendered to relative path '{rendered}'")]
    NotAbsolute { template: String, rendered: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Placeholder),
}

/// A path (or name) template using `{placeholder}` syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(raw: impl Into<String>) -> Result<Self, TemplateError> {
        let raw = raw.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }

            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(TemplateError::Unterminated {
                    template: raw.clone(),
                });
            }

            let placeholder =
                Placeholder::from_name(&name).ok_or_else(|| TemplateError::UnknownPlaceholder {
                    template: raw.clone(),
                    name: name.clone(),
                })?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Var(placeholder));
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholders this template declares.
    pub fn placeholders(&self) -> BTreeSet<Placeholder> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Var(p) => Some(*p),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Var(p) if *p == placeholder))
    }

    /// Render to a plain string, e.g. a process id.
    pub fn render(&self, vars: &TemplateVars) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Var(p) => {
                    let value = vars.get(*p).ok_or_else(|| TemplateError::Missing {
                        template: self.raw.clone(),
                        placeholder: *p,
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Render to an absolute path.
    pub fn render_path(&self, vars: &TemplateVars) -> Result<PathBuf, TemplateError> {
        let rendered = self.render(vars)?;
        let path = PathBuf::from(&rendered);
        if !path.is_absolute() {
            return Err(TemplateError::NotAbsolute {
                template: self.raw.clone(),
                rendered,
            });
        }
        Ok(path)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Values supplied to [`PathTemplate::render`].
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    root: Option<String>,
    version_full: Option<String>,
    instance_id: Option<String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, root: impl AsRef<std::path::Path>) -> Self {
        let root = root.as_ref().to_string_lossy();
        self.root = Some(root.trim_end_matches('/').to_string());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version_full = Some(version.into());
        self
    }

    pub fn instance(mut self, instance_id: Option<&str>) -> Self {
        self.instance_id = instance_id.map(str::to_string);
        self
    }

    fn get(&self, placeholder: Placeholder) -> Option<&str> {
        match placeholder {
            Placeholder::Root => self.root.as_deref(),
            Placeholder::VersionFull => self.version_full.as_deref(),
            Placeholder::InstanceId => self.instance_id.as_deref(),
        }
    }
}
