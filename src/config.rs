//! Viewer configuration.
//!
//! Natively the settings come from the command line (`flow-ar [--key value]...
//! [model]`), on the web from the page's query string (`?model=...&fov=90`).
//! Both go through [`ViewerConfig::apply`], so the keys are the same:
//!
//! | key      | value                              | default        |
//! |----------|------------------------------------|----------------|
//! | `model`  | URL or path of a glb/gltf/fbx file | none           |
//! | `fov`    | vertical field of view in degrees  | 140            |
//! | `box`    | show the spinning box              | true           |
//! | `orbit`  | enable the orbit controls          | true           |
//! | `facing` | `environment` or `user`            | `environment`  |
//! | `range`  | pointer to world scale             | 5              |
//! | `damping`| orbit damping, `0` disables it     | 0.05           |
//! | `spin`   | box rotation per frame in radians  | 0.01           |

use anyhow::{Context as _, bail};

use crate::capture::FacingMode;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerConfig {
    pub model_url: Option<String>,
    pub show_box: bool,
    pub orbit: bool,
    pub facing: FacingMode,
    pub camera_position: [f32; 3],
    pub fov_degrees: f32,
    pub znear: f32,
    pub zfar: f32,
    /// Distance of the video plane in front of the camera.
    pub backdrop_distance: f32,
    pub pointer_range: f32,
    pub spin_per_frame: f32,
    pub damping: Option<f32>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            model_url: None,
            show_box: true,
            orbit: true,
            facing: FacingMode::Environment,
            camera_position: [0.0, 0.0, 5.0],
            fov_degrees: 140.0,
            znear: 0.1,
            zfar: 1000.0,
            backdrop_distance: 15.0,
            pointer_range: 5.0,
            spin_per_frame: 0.01,
            damping: Some(0.05),
        }
    }
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

impl ViewerConfig {
    /// Set one option. Unknown keys and malformed values are errors and leave
    /// the config untouched.
    pub fn apply(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "model" => {
                let value = value.trim();
                self.model_url = (!value.is_empty()).then(|| value.to_string());
            }
            "fov" => {
                let fov: f32 = value.parse().context("fov")?;
                if !(fov > 0.0 && fov < 180.0) {
                    bail!("fov must be between 0 and 180 degrees, got {fov}");
                }
                self.fov_degrees = fov;
            }
            "box" => self.show_box = parse_bool(value)?,
            "orbit" => self.orbit = parse_bool(value)?,
            "facing" => self.facing = value.parse()?,
            "range" => self.pointer_range = value.parse().context("range")?,
            "spin" => self.spin_per_frame = value.parse().context("spin")?,
            "damping" => {
                let damping: f32 = value.parse().context("damping")?;
                if !(0.0..1.0).contains(&damping) {
                    bail!("damping must be in [0, 1), got {damping}");
                }
                self.damping = (damping > 0.0).then_some(damping);
            }
            _ => bail!("unknown option {key:?}"),
        }
        Ok(())
    }

    /// Build a config from key/value pairs, skipping bad entries with a warning.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            if let Err(e) = config.apply(key.as_ref(), value.as_ref()) {
                log::warn!("Ignoring option {}: {:#}", key.as_ref(), e);
            }
        }
        config
    }

    /// Parse `--key value`, `--key=value` and a positional model path.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Self {
        let mut pairs = Vec::new();
        let mut args = args.into_iter().peekable();
        while let Some(arg) = args.next() {
            match arg.strip_prefix("--") {
                Some(flag) => match flag.split_once('=') {
                    Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
                    None => {
                        let value = match args.peek() {
                            Some(next) if !next.starts_with("--") => args.next().unwrap_or_default(),
                            _ => String::new(),
                        };
                        pairs.push((flag.to_string(), value));
                    }
                },
                None => pairs.push(("model".to_string(), arg)),
            }
        }
        Self::from_pairs(pairs)
    }

    /// Parse a URL query string such as `model=a.glb&fov=90`. Percent-encoding
    /// is decoded.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        match reqwest::Url::parse(&format!("http://localhost/?{query}")) {
            Ok(url) => Self::from_pairs(url.query_pairs()),
            Err(e) => {
                log::warn!("Ignoring malformed query string: {e}");
                Self::default()
            }
        }
    }

    /// Settings of the running process: command line natively, page URL on
    /// the web.
    pub fn from_env() -> Self {
        #[cfg(not(target_arch = "wasm32"))]
        {
            Self::from_args(std::env::args().skip(1))
        }
        #[cfg(target_arch = "wasm32")]
        {
            let query = web_sys::window()
                .and_then(|window| window.location().search().ok())
                .unwrap_or_default();
            Self::from_query(&query)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_scene() {
        let config = ViewerConfig::default();
        assert_eq!(config.camera_position, [0.0, 0.0, 5.0]);
        assert_eq!(config.fov_degrees, 140.0);
        assert_eq!(config.pointer_range, 5.0);
        assert_eq!(config.damping, Some(0.05));
        assert_eq!(config.facing, FacingMode::Environment);
    }

    #[test]
    fn query_string_is_decoded() {
        let config =
            ViewerConfig::from_query("?model=https%3A%2F%2Fcdn%2Fa.glb%3Ftoken%3Dabc&fov=90&box=false");
        assert_eq!(config.model_url.as_deref(), Some("https://cdn/a.glb?token=abc"));
        assert_eq!(config.fov_degrees, 90.0);
        assert!(!config.show_box);
    }

    #[test]
    fn args_accept_both_flag_styles_and_a_positional_model() {
        let args = ["--fov=60", "--orbit", "false", "--facing", "user", "scene.fbx"]
            .map(String::from);
        let config = ViewerConfig::from_args(args);
        assert_eq!(config.fov_degrees, 60.0);
        assert!(!config.orbit);
        assert_eq!(config.facing, FacingMode::User);
        assert_eq!(config.model_url.as_deref(), Some("scene.fbx"));
    }

    #[test]
    fn bare_flag_means_true() {
        let config = ViewerConfig::from_args(["--box".to_string()]);
        assert!(config.show_box);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = ViewerConfig::from_query("fov=abc&range=2&unknown=1&damping=0");
        assert_eq!(config.fov_degrees, 140.0);
        assert_eq!(config.pointer_range, 2.0);
        assert_eq!(config.damping, None);
    }
}
