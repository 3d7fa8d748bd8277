//! Top-level configuration, one section per component.

use cdp_adapter::CdpConfig;
use devpipe_event_store::LogCfg;
use event_pipeline::{MonitorSettings, PipelineConfig};
use network_tap::TapConfig;
use serde::{Deserialize, Serialize};
use session_tracker::TrackerConfig;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevpipeConfig {
    pub cdp: CdpConfig,
    pub tap: TapConfig,
    pub pipeline: PipelineConfig,
    pub sessions: TrackerConfig,
    pub log: LogCfg,
}

impl DevpipeConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // an empty file deserializes to null
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            pipeline: self.pipeline.clone(),
            tap: self.tap.clone(),
            log: self.log.clone(),
        }
    }
}
