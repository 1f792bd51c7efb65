use anyhow::{Result, bail};
use std::path::Path;

/// Marker file distinguishing a skill package from a generic bundle.
pub const SKILL_MARKER: &str = "SKILL.md";

const MAX_NAME_LEN: usize = 100;

/// Lowercase URL-safe identifier derived from a display name. Non
/// `[a-z0-9-]` runs collapse to a single hyphen, edge hyphens are trimmed.
/// Idempotent: slugifying a slug is a no-op.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.to_lowercase().chars() {
        let c = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            ch
        } else {
            '-'
        };
        if c == '-' && (out.is_empty() || out.ends_with('-')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("name is required");
    }
    if name.len() > MAX_NAME_LEN {
        bail!("name must be {MAX_NAME_LEN} characters or fewer");
    }
    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() {
        bail!("name must contain at least one letter or digit");
    }
    Ok(())
}

/// Strict three-component numeric semver. `latest` is a pull-time alias and
/// rejected here so it can never be published as a concrete version.
pub fn validate_version(version: &str) -> Result<()> {
    if version == "latest" {
        bail!("\"latest\" is a reserved version identifier");
    }
    let mut components = 0usize;
    for part in version.split('.') {
        components += 1;
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            bail!("version must be a three-part semver string like 1.2.0 (got \"{version}\")");
        }
    }
    if components != 3 {
        bail!("version must be a three-part semver string like 1.2.0 (got \"{version}\")");
    }
    Ok(())
}

/// `owner/name` pair, or a bare `name` whose owner is the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub owner: Option<String>,
    pub name: String,
}

impl AssetRef {
    pub fn parse(input: &str) -> Result<Self> {
        if !input.contains('/') {
            if input.is_empty() {
                bail!("asset reference must be <name> or <owner/name>");
            }
            return Ok(Self {
                owner: None,
                name: input.to_string(),
            });
        }
        let mut parts = input.splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            bail!("asset reference must be <name> or <owner/name> (got \"{input}\")");
        }
        Ok(Self {
            owner: Some(owner.to_string()),
            name: name.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    File,
    Skill,
    Bundle,
}

impl AssetKind {
    pub fn detect(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        if meta.is_file() {
            Ok(Self::File)
        } else if meta.is_dir() {
            if path.join(SKILL_MARKER).exists() {
                Ok(Self::Skill)
            } else {
                Ok(Self::Bundle)
            }
        } else {
            bail!("unsupported path type: {}", path.display());
        }
    }

    pub fn is_package(self) -> bool {
        !matches!(self, Self::File)
    }

    /// Wire value for the push metadata `asset_format` field.
    pub fn format_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Skill => "skill",
            Self::Bundle => "bundle",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::File => "asset",
            Self::Skill => "skill package",
            Self::Bundle => "bundle",
        }
    }
}
