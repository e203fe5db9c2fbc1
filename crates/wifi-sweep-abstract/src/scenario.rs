use crate::config::{OutputFormat, PhyConfig, RunNaming, SweepConfig, WifiStandard};
use serde::Deserialize;
use std::path::PathBuf;

/// Partial sweep description, read from a TOML file or assembled from
/// command-line flags. Unset fields keep the value already in the config.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct SweepOverride {
    pub standards: Option<Vec<WifiStandard>>,
    pub distances: Option<Vec<f64>>,
    pub user_counts: Option<Vec<u32>>,
    pub sim_time_secs: Option<f64>,
    pub bit_rate_kbps: Option<f64>,
    pub packet_size: Option<u32>,
    pub max_packets: Option<u32>,
    pub experiment: Option<String>,
    pub strategy: Option<String>,
    pub author: Option<String>,
    pub file_stem: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub format: Option<OutputFormat>,
    pub naming: Option<RunNaming>,
    pub phy: Option<PhyOverride>,
}

/// Partial `[phy]` table; merged field by field into [`PhyConfig`].
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PhyOverride {
    pub tx_power_dbm: Option<f64>,
    pub rx_sensitivity_dbm: Option<f64>,
    pub noise_floor_dbm: Option<f64>,
    pub queue_limit: Option<usize>,
    pub seed: Option<u64>,
}

impl PhyOverride {
    pub fn apply_to(&self, phy: &mut PhyConfig) {
        if let Some(v) = self.tx_power_dbm {
            phy.tx_power_dbm = v;
        }
        if let Some(v) = self.rx_sensitivity_dbm {
            phy.rx_sensitivity_dbm = v;
        }
        if let Some(v) = self.noise_floor_dbm {
            phy.noise_floor_dbm = v;
        }
        if let Some(v) = self.queue_limit {
            phy.queue_limit = v;
        }
        if let Some(v) = self.seed {
            phy.seed = v;
        }
    }
}

impl SweepOverride {
    pub fn apply_to(&self, config: &mut SweepConfig) {
        if let Some(v) = &self.standards {
            config.standards = v.clone();
        }
        if let Some(v) = &self.distances {
            config.distances = v.clone();
        }
        if let Some(v) = &self.user_counts {
            config.user_counts = v.clone();
        }
        if let Some(v) = self.sim_time_secs {
            config.sim_time_secs = v;
        }
        if let Some(v) = self.bit_rate_kbps {
            config.bit_rate_kbps = v;
        }
        if let Some(v) = self.packet_size {
            config.packet_size = v;
        }
        if let Some(v) = self.max_packets {
            config.max_packets = v;
        }
        if let Some(v) = &self.experiment {
            config.experiment = v.clone();
        }
        if let Some(v) = &self.strategy {
            config.strategy = v.clone();
        }
        if let Some(v) = &self.author {
            config.author = v.clone();
        }
        if let Some(v) = &self.file_stem {
            config.file_stem = v.clone();
        }
        if let Some(v) = &self.output_dir {
            config.output_dir = v.clone();
        }
        if let Some(v) = self.format {
            config.format = v;
        }
        if let Some(v) = self.naming {
            config.naming = v;
        }
        if let Some(v) = &self.phy {
            v.apply_to(&mut config.phy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_override_replaces_only_given_fields() {
        let text = r#"
            standards = ["80211ax"]
            distances = [0.0, 45.5]
            bit_rate_kbps = 1000.0
            format = "json"
            naming = "tuple-only"

            [phy]
            queue_limit = 64
        "#;
        let overrides: SweepOverride = toml::from_str(text).unwrap();

        let mut config = SweepConfig::default();
        overrides.apply_to(&mut config);

        assert_eq!(config.standards, vec![WifiStandard::Ieee80211ax]);
        assert_eq!(config.distances, vec![0.0, 45.5]);
        assert_eq!(config.user_counts, vec![1, 10, 20, 50]);
        assert_eq!(config.bit_rate_kbps, 1000.0);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.naming, RunNaming::TupleOnly);
        assert_eq!(config.phy.queue_limit, 64);
        assert_eq!(config.phy.tx_power_dbm, 40.0);
        assert_eq!(config.sim_time_secs, 20.0);
    }

    #[test]
    fn partial_phy_table_keeps_existing_values() {
        let mut config = SweepConfig::default();
        config.phy.tx_power_dbm = 20.0;
        config.phy.seed = 7;

        let overrides: SweepOverride = toml::from_str("[phy]\nqueue_limit = 10\n").unwrap();
        overrides.apply_to(&mut config);

        assert_eq!(config.phy.queue_limit, 10);
        assert_eq!(config.phy.tx_power_dbm, 20.0);
        assert_eq!(config.phy.seed, 7);

        let seed_only = SweepOverride {
            phy: Some(PhyOverride {
                seed: Some(99),
                ..Default::default()
            }),
            ..Default::default()
        };
        seed_only.apply_to(&mut config);
        assert_eq!(config.phy.seed, 99);
        assert_eq!(config.phy.queue_limit, 10);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<SweepOverride, _> = toml::from_str("bitrate = 5");
        assert!(result.is_err());
    }
}
