use crate::error::{Error, Result};
use crate::raw::MAX_REQUEST;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Which native heap backs the process-wide allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
	#[default]
	CHeap,
	OpenSsl,
}

impl std::str::FromStr for Backend {
	type Err = Error;
	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_lowercase().as_str() {
			"c-heap" | "cheap" | "libc" => Ok(Self::CHeap),
			"openssl" | "open-ssl" => Ok(Self::OpenSsl),
			other => Err(Error::config(format!("unknown backend: {other}"))),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
	pub log_level: String,
	pub backend: Backend,
	/// Clear regions before they go back to the heap. Raw releases carry no
	/// length, so this needs `track_allocations`.
	pub wipe_on_release: bool,
	/// Guard raw releases with a live-region registry.
	pub track_allocations: bool,
	/// Largest single request accepted at the boundary.
	pub max_allocation: u64,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			log_level: "info".into(),
			backend: Backend::default(),
			wipe_on_release: false,
			track_allocations: false,
			max_allocation: MAX_REQUEST as u64,
		}
	}
}

impl BridgeConfig {
	pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
		let data = fs::read_to_string(path)?;
		let cfg: Self = toml::from_str(&data).map_err(|e| Error::config(format!("toml parse error: {e}")))?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
		let data = toml::to_string_pretty(self).map_err(|e| Error::config(format!("toml encode error: {e}")))?;
		fs::write(path, data)?;
		Ok(())
	}

	pub fn from_env() -> Result<Self> {
		let mut cfg = Self::default();
		if let Ok(v) = std::env::var("NYX_ALLOC_LOG_LEVEL") { cfg.log_level = v; }
		if let Ok(v) = std::env::var("NYX_ALLOC_BACKEND") { cfg.backend = v.parse()?; }
		if let Ok(v) = std::env::var("NYX_ALLOC_WIPE") { cfg.wipe_on_release = flag(&v); }
		if let Ok(v) = std::env::var("NYX_ALLOC_TRACK") { cfg.track_allocations = flag(&v); }
		if let Ok(v) = std::env::var("NYX_ALLOC_MAX") {
			cfg.max_allocation = v.trim().parse().map_err(|e| Error::config(format!("invalid NYX_ALLOC_MAX: {e}")))?;
		}
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn validate(&self) -> Result<()> {
		let allowed = ["trace","debug","info","warn","error"];
		if !allowed.contains(&self.log_level.as_str()) {
			return Err(Error::config(format!("invalid log_level: {}", self.log_level)));
		}
		if self.max_allocation > MAX_REQUEST as u64 {
			return Err(Error::config(format!("max_allocation {} exceeds {}", self.max_allocation, MAX_REQUEST)));
		}
		if self.wipe_on_release && !self.track_allocations {
			return Err(Error::config("wipe_on_release requires track_allocations"));
		}
		Ok(())
	}

	/// Apply the boundary cap to a request.
	pub fn check_request(&self, requested: usize) -> Result<usize> {
		if requested as u64 > self.max_allocation {
			return Err(Error::TooLarge { requested: requested as u64, limit: self.max_allocation });
		}
		Ok(requested)
	}
}

fn flag(v: &str) -> bool {
	v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}
