//! The target runtime profile against which wheels are selected and
//! environment markers are evaluated: an interpreter version plus an
//! operating system, expanded into ABI and platform tag lists.

mod tags;

pub use tags::{WheelTag, WheelTags};

use crate::types::PypiVersion;
use miette::Diagnostic;
use once_cell::sync::OnceCell;
use pep508_rs::{MarkerEnvironment, StringVersion};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The python interpreter versions that can be targeted, as two-or-three digit
/// tags.
pub const PYTHON_VERSIONS: &[&str] = &[
    "27", "36", "37", "38", "39", "310", "311", "312", "313",
];

/// The operating systems that can be targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum OperatingSystem {
    Linux,
    Macos,
    Windows,
}

impl OperatingSystem {
    /// All targetable operating systems.
    pub const ALL: &'static [OperatingSystem] = &[
        OperatingSystem::Linux,
        OperatingSystem::Macos,
        OperatingSystem::Windows,
    ];

    /// The name as used on the command line and in purls.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingSystem::Linux => "linux",
            OperatingSystem::Macos => "macos",
            OperatingSystem::Windows => "windows",
        }
    }

    /// The platform tags wheels carry for this operating system, most specific
    /// first.
    fn platforms(&self) -> &'static [&'static str] {
        match self {
            OperatingSystem::Linux => &[
                "linux_x86_64",
                "manylinux1_x86_64",
                "manylinux2010_x86_64",
                "manylinux2014_x86_64",
                "manylinux_2_17_x86_64",
                "manylinux_2_28_x86_64",
                "musllinux_1_2_x86_64",
            ],
            OperatingSystem::Macos => &[
                "macosx_10_9_intel",
                "macosx_10_9_x86_64",
                "macosx_10_10_intel",
                "macosx_10_10_x86_64",
                "macosx_10_11_intel",
                "macosx_10_11_x86_64",
                "macosx_10_12_x86_64",
                "macosx_10_13_x86_64",
                "macosx_10_14_x86_64",
                "macosx_10_15_x86_64",
                "macosx_11_0_x86_64",
                "macosx_10_9_universal2",
                "macosx_10_10_universal2",
                "macosx_10_11_universal2",
                "macosx_10_12_universal2",
                "macosx_10_13_universal2",
                "macosx_10_14_universal2",
                "macosx_10_15_universal2",
                "macosx_11_0_universal2",
            ],
            OperatingSystem::Windows => &["win_amd64"],
        }
    }
}

impl FromStr for OperatingSystem {
    type Err = InvalidEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(OperatingSystem::Linux),
            "macos" => Ok(OperatingSystem::Macos),
            "windows" => Ok(OperatingSystem::Windows),
            _ => Err(InvalidEnvironment::OperatingSystem {
                given: s.to_owned(),
            }),
        }
    }
}

impl Display for OperatingSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error for a python version or operating system outside the supported set.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum InvalidEnvironment {
    #[error("invalid python version: {given}. Must be one of: {supported}")]
    PythonVersion { given: String, supported: String },

    #[error("invalid operating system: {given}. Must be one of: linux, macos, windows")]
    OperatingSystem { given: String },
}

/// A target installation environment: a python version and operating system,
/// expanded to the ABIs and platform tags used for wheel selection, and to the
/// marker context used for requirement filtering.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The targeted interpreter version as a tag like "310".
    python_version: String,

    /// The targeted operating system.
    operating_system: OperatingSystem,

    /// The python implementation tag. Only CPython is targeted.
    implementation: String,

    /// The ABIs supported by the interpreter.
    abis: Vec<String>,

    /// The platform tags supported by the operating system.
    platforms: Vec<String>,

    tags: OnceCell<WheelTags>,
    markers: OnceCell<MarkerEnvironment>,
}

impl Environment {
    /// Build an environment from a python version tag (both "310" and "3.10"
    /// are accepted) and an operating system name.
    pub fn from_python_version_and_os(
        python_version: &str,
        operating_system: &str,
    ) -> Result<Self, InvalidEnvironment> {
        let python_version = python_version.replace('.', "");
        if !PYTHON_VERSIONS.contains(&python_version.as_str()) {
            return Err(InvalidEnvironment::PythonVersion {
                given: python_version,
                supported: PYTHON_VERSIONS.join(", "),
            });
        }
        let operating_system = OperatingSystem::from_str(operating_system)?;

        Ok(Environment {
            abis: abis_for_python_version(&python_version),
            platforms: operating_system
                .platforms()
                .iter()
                .map(|&platform| platform.to_owned())
                .collect(),
            python_version,
            operating_system,
            implementation: "cp".to_owned(),
            tags: OnceCell::new(),
            markers: OnceCell::new(),
        })
    }

    /// The targeted python version tag, e.g. "310".
    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    /// The targeted python version in dotted form, e.g. "3.10".
    pub fn python_dot_version(&self) -> PypiVersion {
        dotted(&self.python_version)
            .parse()
            .expect("version parsing is infallible")
    }

    /// The targeted operating system.
    pub fn operating_system(&self) -> OperatingSystem {
        self.operating_system
    }

    /// The ordered set of wheel tags supported by this environment.
    pub fn tags(&self) -> &WheelTags {
        self.tags.get_or_init(|| {
            tags::supported_tags(
                &self.implementation,
                &self.python_version,
                &self.abis,
                &self.platforms,
            )
        })
    }

    /// The PEP 508 marker context for this environment, describing the
    /// target rather than the running interpreter: `sys_platform` and
    /// `platform_system` carry the values a CPython interpreter reports on
    /// the target OS (`darwin`/`Darwin` on macos, `win32`/`Windows` on
    /// windows), so platform-conditional dependencies evaluate the same way
    /// they would during a real install.
    pub fn markers(&self) -> &MarkerEnvironment {
        self.markers.get_or_init(|| {
            let python_version = dotted(&self.python_version);
            let full_version = format!("{python_version}.0");
            let version = |v: &str| {
                StringVersion::from_str(v).expect("dotted python versions always parse")
            };
            let (sys_platform, platform_system) = match self.operating_system {
                OperatingSystem::Linux => ("linux", "Linux"),
                OperatingSystem::Macos => ("darwin", "Darwin"),
                OperatingSystem::Windows => ("win32", "Windows"),
            };

            MarkerEnvironment {
                implementation_name: "cpython".to_owned(),
                implementation_version: version(&full_version),
                os_name: match self.operating_system {
                    OperatingSystem::Windows => "nt".to_owned(),
                    _ => "posix".to_owned(),
                },
                platform_machine: match self.operating_system {
                    OperatingSystem::Windows => "AMD64".to_owned(),
                    _ => "x86_64".to_owned(),
                },
                platform_python_implementation: "CPython".to_owned(),
                platform_release: String::new(),
                platform_system: platform_system.to_owned(),
                platform_version: String::new(),
                python_full_version: version(&full_version),
                python_version: version(&python_version),
                sys_platform: sys_platform.to_owned(),
            }
        })
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "python {} on {}",
            dotted(&self.python_version),
            self.operating_system
        )
    }
}

/// Turn a version tag like "310" into its dotted form "3.10".
fn dotted(python_version: &str) -> String {
    let (major, minor) = python_version.split_at(1);
    format!("{major}.{minor}")
}

/// The ABIs an interpreter of the given version supports.
fn abis_for_python_version(python_version: &str) -> Vec<String> {
    let mut abis = vec![
        format!("cp{python_version}"),
        format!("cp{python_version}m"),
    ];
    if python_version != "27" {
        abis.push("abi3".to_owned());
    }
    abis
}
