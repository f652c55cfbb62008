use super::{PackageName, ParsePackageNameError, PypiVersion};
use crate::environment::WheelTag;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// The name of a distribution archive and everything that can be derived from
/// it without opening the archive.
///
/// A wheel is a binary distribution: its filename encodes the interpreter,
/// ABI and platform tags it was built for. An sdist is a source distribution:
/// its filename only carries a name and version, and its contents have to be
/// built (or at least inspected) to learn anything more.
#[derive(Debug, Clone, PartialOrd, Ord, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ArtifactName {
    /// A binary distribution
    Wheel(WheelFilename),
    /// A source distribution
    SDist(SDistFilename),
}

impl ArtifactName {
    /// Parse an artifact name from a filename, dispatching on the extension.
    pub fn from_filename(filename: &str) -> Result<Self, InvalidDistributionFilename> {
        if filename.ends_with(".whl") {
            Ok(ArtifactName::Wheel(WheelFilename::from_filename(filename)?))
        } else if SDistFormat::from_filename(filename).is_some() {
            Ok(ArtifactName::SDist(SDistFilename::from_filename(filename)?))
        } else {
            Err(InvalidDistributionFilename::Extension(filename.to_owned()))
        }
    }

    /// The distribution name encoded in the filename.
    pub fn distribution(&self) -> &PackageName {
        match self {
            ArtifactName::Wheel(name) => &name.distribution,
            ArtifactName::SDist(name) => &name.distribution,
        }
    }

    /// The version encoded in the filename.
    pub fn version(&self) -> &PypiVersion {
        match self {
            ArtifactName::Wheel(name) => &name.version,
            ArtifactName::SDist(name) => &name.version,
        }
    }

    /// Returns this name as a wheel filename.
    pub fn as_wheel(&self) -> Option<&WheelFilename> {
        match self {
            ArtifactName::Wheel(name) => Some(name),
            ArtifactName::SDist(_) => None,
        }
    }

    /// Returns this name as an sdist filename.
    pub fn as_sdist(&self) -> Option<&SDistFilename> {
        match self {
            ArtifactName::Wheel(_) => None,
            ArtifactName::SDist(name) => Some(name),
        }
    }
}

impl Display for ArtifactName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactName::Wheel(name) => write!(f, "{name}"),
            ArtifactName::SDist(name) => write!(f, "{name}"),
        }
    }
}

/// An error for a filename that does not parse as a wheel or sdist. The
/// repository client treats this as "drop the link".
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum InvalidDistributionFilename {
    #[error("invalid wheel filename '{0}'")]
    Wheel(String),

    #[error("invalid sdist filename '{0}'")]
    SDist(String),

    #[error("invalid distribution extension. Must be .whl, .tar.gz, .zip or .tar.xz (filename='{0}')")]
    Extension(String),

    #[error(transparent)]
    PackageName(#[from] ParsePackageNameError),
}

/// The parsed form of a wheel filename:
/// `{name}-{version}[-{build}]-{python tags}-{abi tags}-{platform tags}.whl`
/// per the [binary distribution format](https://packaging.python.org/en/latest/specifications/binary-distribution-format/).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WheelFilename {
    /// Distribution name. Underscores in the filename map back to hyphens.
    pub distribution: PackageName,

    /// Distribution version.
    pub version: PypiVersion,

    /// Optional build number, a tie-breaker between otherwise equal wheels.
    pub build: Option<String>,

    /// Interpreter tags, e.g. `py3` or `cp310`.
    pub python_tags: Vec<String>,

    /// ABI tags, e.g. `cp310`, `abi3` or `none`.
    pub abi_tags: Vec<String>,

    /// Platform tags, e.g. `manylinux_2_17_x86_64` or `any`.
    pub platform_tags: Vec<String>,
}

impl WheelFilename {
    /// Parse a wheel filename, e.g. `trio-0.18.0-py3-none-any.whl`.
    pub fn from_filename(filename: &str) -> Result<Self, InvalidDistributionFilename> {
        static WHEEL_RE: OnceLock<Regex> = OnceLock::new();
        let wheel_re = WHEEL_RE.get_or_init(|| {
            Regex::new(
                r"(?x)^
                  (?P<name>.+?)-(?P<version>.*?)
                  (-(?P<build>\d[^-]*?))?
                  -(?P<python>.+?)-(?P<abi>.+?)-(?P<platform>.+?)
                  \.whl$",
            )
            .unwrap()
        });

        let captures = wheel_re
            .captures(filename)
            .ok_or_else(|| InvalidDistributionFilename::Wheel(filename.to_owned()))?;

        // The wheel naming scheme mangles hyphens in the name to underscores.
        let distribution = captures["name"].replace('_', "-").parse::<PackageName>()?;
        let version: PypiVersion = captures["version"]
            .replace("%2B", "+")
            .parse()
            .expect("version parsing is infallible");
        let split_tags =
            |key: &str| -> Vec<String> { captures[key].split('.').map(ToOwned::to_owned).collect() };

        Ok(WheelFilename {
            distribution,
            version,
            build: captures.name("build").map(|m| m.as_str().to_owned()),
            python_tags: split_tags("python"),
            abi_tags: split_tags("abi"),
            platform_tags: split_tags("platform"),
        })
    }

    /// Returns an iterator over the cross-product of the python, abi and
    /// platform tags of this wheel. May contain duplicates; use
    /// [`Self::all_tags`] for a unique set.
    pub fn all_tags_iter(&self) -> impl Iterator<Item = WheelTag> + '_ {
        self.python_tags
            .iter()
            .cartesian_product(self.abi_tags.iter())
            .cartesian_product(self.platform_tags.iter())
            .map(|((python, abi), platform)| WheelTag {
                interpreter: python.clone(),
                abi: abi.clone(),
                platform: platform.clone(),
            })
    }

    /// The set of all tags this wheel was built for.
    pub fn all_tags(&self) -> HashSet<WheelTag> {
        self.all_tags_iter().collect()
    }

    /// A pure wheel runs on every Python 3 and every OS.
    pub fn is_pure(&self) -> bool {
        self.python_tags.iter().any(|t| t == "py3")
            && self.abi_tags.iter().any(|t| t == "none")
            && self.platform_tags.iter().any(|t| t == "any")
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{name}-{version}{build}-{python}-{abi}-{platform}.whl",
            name = self.distribution.as_source_str().replace('-', "_"),
            version = self.version,
            build = self
                .build
                .as_deref()
                .map_or_else(String::new, |build| format!("-{build}")),
            python = self.python_tags.join("."),
            abi = self.abi_tags.join("."),
            platform = self.platform_tags.join("."),
        )
    }
}

/// The archive formats a source distribution can be shipped in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SDistFormat {
    TarGz,
    Zip,
    TarXz,
}

impl SDistFormat {
    /// Determine the format from a filename suffix, or `None` for anything
    /// that is not a recognized sdist extension.
    pub fn from_filename(filename: &str) -> Option<SDistFormat> {
        if filename.ends_with(".tar.gz") {
            Some(SDistFormat::TarGz)
        } else if filename.ends_with(".zip") {
            Some(SDistFormat::Zip)
        } else if filename.ends_with(".tar.xz") {
            Some(SDistFormat::TarXz)
        } else {
            None
        }
    }

    /// The file extension including the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            SDistFormat::TarGz => ".tar.gz",
            SDistFormat::Zip => ".zip",
            SDistFormat::TarXz => ".tar.xz",
        }
    }

    /// Whether we can actually unpack this format. `.tar.xz` links are
    /// collected so the catalog is complete but extraction refuses them.
    pub fn is_extractable(&self) -> bool {
        matches!(self, SDistFormat::TarGz | SDistFormat::Zip)
    }
}

impl Display for SDistFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// The parsed form of an sdist filename: `{name}-{version}.{tar.gz|zip|tar.xz}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SDistFilename {
    /// Distribution name.
    pub distribution: PackageName,

    /// Distribution version.
    pub version: PypiVersion,

    /// The archive format of the file.
    pub format: SDistFormat,
}

impl SDistFilename {
    /// Parse an sdist filename, e.g. `trio-0.18.0.tar.gz`.
    ///
    /// Sdist names are not nearly as well-specified as wheel names and some
    /// legacy uploads mix platform or VCS tokens into the version part of the
    /// filename (`intbitset-1.3.linux-x86_64.tar.gz`,
    /// `selenium-2.0-dev-9429.tar.gz`). Those are rejected rather than
    /// surfaced as bogus releases.
    pub fn from_filename(filename: &str) -> Result<Self, InvalidDistributionFilename> {
        let invalid = || InvalidDistributionFilename::SDist(filename.to_owned());

        let format = SDistFormat::from_filename(filename).ok_or_else(invalid)?;
        let stem = filename
            .strip_suffix(format.extension())
            .expect("the extension was just matched");

        let (name, version) = stem.rsplit_once('-').ok_or_else(invalid)?;
        if name.is_empty() || version.is_empty() {
            return Err(invalid());
        }

        // embedded architecture
        if version.contains("x86_64") || version.contains("i386") {
            return Err(invalid());
        }
        // all-alphabetic version
        if version.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        // bare build number like the `1` in `cffi-1.2.0-1.tar.gz`
        if version.len() == 1 && version.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        // old revision markers like `r1`
        if version.len() == 2
            && version.starts_with('r')
            && version[1..].chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        // dotless and too short to be a calver
        if !version.contains('.') && version.len() < 3 {
            return Err(invalid());
        }
        // the version part of `selenium-2.0-dev-9429.tar.gz`
        if name.ends_with("dev") && !version.contains('.') {
            return Err(invalid());
        }
        // pre/post markers that leaked out of the version
        if ["beta", "rc", "pre", "post", "final"]
            .iter()
            .any(|marker| version.starts_with(marker))
        {
            return Err(invalid());
        }

        Ok(SDistFilename {
            distribution: name.parse::<PackageName>()?,
            version: version
                .replace("%2B", "+")
                .parse()
                .expect("version parsing is infallible"),
            format,
        })
    }

    /// The stem of the filename, without the archive extension.
    pub fn stem(&self) -> String {
        format!(
            "{}-{}",
            self.distribution.as_source_str(),
            self.version
        )
    }
}

impl Display for SDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{name}-{version}{format}",
            name = self.distribution.as_source_str(),
            version = self.version,
            format = self.format,
        )
    }
}
