//! Wheels encode the interpreter, ABI and platform they support in their
//! filenames as compatibility tags. This module generates the ordered tag set
//! a target [`Environment`](super::Environment) supports, equivalent to what
//! pip computes for `pip download --python-version ... --platform ...`.

use indexmap::IndexSet;
use itertools::Itertools;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// A single `(interpreter, abi, platform)` tag triple.
#[derive(Debug, Clone, Hash, Eq, PartialEq, SerializeDisplay, DeserializeFromStr)]
pub struct WheelTag {
    /// The interpreter tag, e.g. "py3" or "cp310".
    pub interpreter: String,

    /// The ABI tag, e.g. "cp310", "abi3" or "none".
    pub abi: String,

    /// The platform tag, e.g. "manylinux2014_x86_64" or "any".
    pub platform: String,
}

impl FromStr for WheelTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((interpreter, abi, platform)) = s.split('-').map(ToOwned::to_owned).collect_tuple()
        else {
            return Err(String::from("not enough '-' separators"));
        };
        Ok(Self {
            interpreter,
            abi,
            platform,
        })
    }
}

impl Display for WheelTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", &self.interpreter, &self.abi, &self.platform)
    }
}

/// An ordered set of tags against which wheel compatibility is checked. The
/// order encodes priority: earlier tags are more specific to the environment.
#[derive(Debug, Clone, Default)]
pub struct WheelTags {
    tags: IndexSet<WheelTag>,
}

impl WheelTags {
    /// Returns an iterator over the supported tags, most specific first.
    pub fn tags(&self) -> impl Iterator<Item = &'_ WheelTag> + '_ {
        self.tags.iter()
    }

    /// Returns true if the specified tag is supported.
    pub fn is_compatible(&self, tag: &WheelTag) -> bool {
        self.tags.contains(tag)
    }

    /// The number of supported tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if the set contains no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<WheelTag> for WheelTags {
    fn from_iter<T: IntoIterator<Item = WheelTag>>(iter: T) -> Self {
        Self {
            tags: FromIterator::from_iter(iter),
        }
    }
}

/// Split a two-or-three digit python version tag like "310" into its major and
/// minor parts.
fn split_python_version(python_version: &str) -> (char, &str) {
    let mut chars = python_version.chars();
    let major = chars.next().expect("python version tags are never empty");
    (major, &python_version[major.len_utf8()..])
}

/// Generate the ordered tag set for the given interpreter version, abis and
/// platforms, following pip's default ordering:
///
/// 1. `{impl}{version}-{abi}-{platform}` for every abi and platform,
/// 2. `{impl}{version}-none-{platform}`,
/// 3. `cp{major}{minor}-abi3-{platform}` for earlier minor versions,
/// 4. `py{major}{minor}-none-{platform}` and `py{major}-none-{platform}`,
/// 5. `{impl}{version}-none-any`, then `py*-none-any`.
///
/// The `py3-none-any` row means a pure wheel is supported by every
/// environment no matter its platform list.
pub fn supported_tags(
    implementation: &str,
    python_version: &str,
    abis: &[String],
    platforms: &[String],
) -> WheelTags {
    let (major, minor) = split_python_version(python_version);
    let interpreter = format!("{implementation}{python_version}");
    let mut tags = IndexSet::new();

    for abi in abis {
        for platform in platforms {
            tags.insert(WheelTag {
                interpreter: interpreter.clone(),
                abi: abi.clone(),
                platform: platform.clone(),
            });
        }
    }

    for platform in platforms {
        tags.insert(WheelTag {
            interpreter: interpreter.clone(),
            abi: "none".into(),
            platform: platform.clone(),
        });
    }

    // older interpreters keep supporting abi3 wheels built for newer ones
    if let Ok(minor) = minor.parse::<u32>() {
        for earlier in (2..minor).rev() {
            for platform in platforms {
                tags.insert(WheelTag {
                    interpreter: format!("cp{major}{earlier}"),
                    abi: "abi3".into(),
                    platform: platform.clone(),
                });
            }
        }
    }

    let generic_interpreters = generic_interpreter_range(major, minor);
    for generic in &generic_interpreters {
        for platform in platforms {
            tags.insert(WheelTag {
                interpreter: generic.clone(),
                abi: "none".into(),
                platform: platform.clone(),
            });
        }
    }

    tags.insert(WheelTag {
        interpreter,
        abi: "none".into(),
        platform: "any".into(),
    });

    for generic in generic_interpreters {
        tags.insert(WheelTag {
            interpreter: generic,
            abi: "none".into(),
            platform: "any".into(),
        });
    }

    WheelTags { tags }
}

/// The version-generic interpreter tags in decreasing order of preference:
/// `py310`, `py3`, `py39`, ..., `py30`.
fn generic_interpreter_range(major: char, minor: &str) -> Vec<String> {
    let mut range = vec![format!("py{major}{minor}"), format!("py{major}")];
    if let Ok(minor) = minor.parse::<u32>() {
        for earlier in (0..minor).rev() {
            range.push(format!("py{major}{earlier}"));
        }
    }
    range
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tag_from_str() {
        let tag = WheelTag::from_str("py2-none-any").unwrap();
        assert_eq!(tag.interpreter, "py2");
        assert_eq!(tag.abi, "none");
        assert_eq!(tag.platform, "any");
        assert_eq!(tag.to_string(), "py2-none-any");
    }

    #[test]
    fn test_supported_tags_ordering() {
        let tags = supported_tags(
            "cp",
            "310",
            &["cp310".into(), "abi3".into()],
            &["linux_x86_64".into(), "manylinux2014_x86_64".into()],
        );

        let all: Vec<String> = tags.tags().map(ToString::to_string).collect();
        // most specific first
        assert_eq!(all[0], "cp310-cp310-linux_x86_64");
        // pure wheels always supported
        assert!(all.contains(&"py3-none-any".to_string()));
        // abi3 wheels for older interpreters are supported
        assert!(all.contains(&"cp39-abi3-linux_x86_64".to_string()));
        // the specific rows outrank the generic ones
        let specific = all.iter().position(|t| t == "cp310-none-linux_x86_64");
        let generic = all.iter().position(|t| t == "py3-none-any");
        assert!(specific < generic);
    }

    #[test]
    fn test_full_tag_order() {
        let tags = supported_tags("cp", "33", &["cp33".into()], &["plat".into()]);
        let rendered: Vec<String> = tags.tags().map(ToString::to_string).collect();
        insta::assert_snapshot!(rendered.join("\n"), @r###"
        cp33-cp33-plat
        cp33-none-plat
        cp32-abi3-plat
        py33-none-plat
        py3-none-plat
        py32-none-plat
        py31-none-plat
        py30-none-plat
        cp33-none-any
        py33-none-any
        py3-none-any
        py32-none-any
        py31-none-any
        py30-none-any
        "###);
    }

    #[test]
    fn test_pure_wheel_compatibility() {
        let tags = supported_tags("cp", "39", &["cp39".into()], &["win_amd64".into()]);
        assert!(tags.is_compatible(&"py3-none-any".parse().unwrap()));
        assert!(tags.is_compatible(&"cp39-cp39-win_amd64".parse().unwrap()));
        assert!(!tags.is_compatible(&"cp39-cp39-linux_x86_64".parse().unwrap()));
    }
}
