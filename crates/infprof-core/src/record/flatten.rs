//! Snapshot to flat record conversion.
//!
//! ```text
//! Snapshot ──▶ system/container registries ──▶ vCpuTime, vCpuTimeT, ...
//!          ──▶ accelerators (flatten)       ──▶ nvidia0UtilizationGpu, ..., nvidiaGpuCount
//!          ──▶ accelerators (json)          ──▶ nvidiaGpusJson, nvidiaGpuCount
//!          ──▶ processes                    ──▶ process0Pid, ..., processCount
//!          ──▶ inference scrape             ──▶ vllmAvailable, vllm_<key>, ...
//! ```

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::model::Snapshot;
use crate::scraper::ScrapeResult;

use super::registry::{
    ACCELERATOR_FIELDS, ACCELERATOR_NESTED, CONTAINER_FIELDS, FieldSpec, PROCESS_FIELDS,
    SYSTEM_FIELDS, TIMESTAMP_SUFFIX,
};
use super::{FlatRecord, FlatValue, TIMESTAMP_KEY};

pub const ACCELERATOR_PREFIX: &str = "nvidia";
pub const ACCELERATOR_COUNT_KEY: &str = "nvidiaGpuCount";
pub const ACCELERATOR_JSON_KEY: &str = "nvidiaGpusJson";
pub const PROCESS_PREFIX: &str = "process";
pub const PROCESS_COUNT_KEY: &str = "processCount";
pub const PROCESS_JSON_KEY: &str = "processesJson";
pub const INFERENCE_PREFIX: &str = "vllm";

/// How variable-length lists are rendered into a record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecordLayout {
    /// `nvidia{i}<Field>` / `process{i}<Field>` keys.
    #[default]
    Flatten,
    /// Each list serialized whole into one JSON string field.
    Json,
}

impl FromStr for RecordLayout {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flatten" | "flat" => Ok(RecordLayout::Flatten),
            "json" => Ok(RecordLayout::Json),
            _ => Err(ConfigError::UnknownLayout(s.to_string())),
        }
    }
}

impl fmt::Display for RecordLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordLayout::Flatten => f.write_str("flatten"),
            RecordLayout::Json => f.write_str("json"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlattenOptions {
    pub layout: RecordLayout,
    /// Highest number of `process{i}` groups emitted per record.
    pub max_processes: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            layout: RecordLayout::Flatten,
            max_processes: 64,
        }
    }
}

/// Converts one snapshot into one flat record.
///
/// Pure: identical snapshots give identical records. Count keys are
/// always present, and no indexed key exists for an index >= its count.
pub fn flatten(snapshot: &Snapshot, opts: &FlattenOptions) -> FlatRecord {
    let mut record = FlatRecord::new();
    record.insert(TIMESTAMP_KEY.to_string(), FlatValue::Int(snapshot.timestamp));

    push_fields(&mut record, "", SYSTEM_FIELDS, &snapshot.system);
    if let Some(container) = &snapshot.container {
        push_fields(&mut record, "", CONTAINER_FIELDS, container);
    }

    record.insert(
        ACCELERATOR_COUNT_KEY.to_string(),
        FlatValue::from(snapshot.accelerators.len()),
    );
    record.insert(
        PROCESS_COUNT_KEY.to_string(),
        FlatValue::from(snapshot.processes.len()),
    );

    match opts.layout {
        RecordLayout::Flatten => {
            for (i, device) in snapshot.accelerators.iter().enumerate() {
                let prefix = format!("{ACCELERATOR_PREFIX}{i}");
                push_fields(&mut record, &prefix, ACCELERATOR_FIELDS, device);
                for nested in ACCELERATOR_NESTED {
                    record.insert(
                        format!("{prefix}{}", nested.key),
                        FlatValue::Str((nested.read)(device)),
                    );
                }
            }
            for (i, process) in snapshot.processes.iter().take(opts.max_processes).enumerate() {
                let prefix = format!("{PROCESS_PREFIX}{i}");
                push_fields(&mut record, &prefix, PROCESS_FIELDS, process);
            }
        }
        RecordLayout::Json => {
            record.insert(
                ACCELERATOR_JSON_KEY.to_string(),
                FlatValue::Str(to_json(&snapshot.accelerators)),
            );
            record.insert(
                PROCESS_JSON_KEY.to_string(),
                FlatValue::Str(to_json(&snapshot.processes)),
            );
        }
    }

    if let Some(scrape) = &snapshot.inference {
        push_inference(&mut record, scrape);
    }

    record
}

fn push_fields<T>(record: &mut FlatRecord, prefix: &str, fields: &[FieldSpec<T>], source: &T) {
    for field in fields {
        let (value, ts) = (field.read)(source);
        record.insert(format!("{prefix}{}", field.key), value);
        record.insert(
            format!("{prefix}{}{TIMESTAMP_SUFFIX}", field.key),
            FlatValue::Int(ts),
        );
    }
}

fn push_inference(record: &mut FlatRecord, scrape: &ScrapeResult) {
    record.insert(
        format!("{INFERENCE_PREFIX}Available"),
        FlatValue::Bool(scrape.available),
    );
    record.insert(
        format!("{INFERENCE_PREFIX}Timestamp"),
        FlatValue::Int(scrape.timestamp),
    );
    if !scrape.available {
        return;
    }

    for (key, value) in &scrape.scalars {
        record.insert(format!("{INFERENCE_PREFIX}_{key}"), FlatValue::float(*value));
    }
    for (key, value) in &scrape.sums {
        record.insert(format!("{INFERENCE_PREFIX}_{key}_sum"), FlatValue::float(*value));
    }
    for (key, value) in &scrape.counts {
        record.insert(format!("{INFERENCE_PREFIX}_{key}_count"), FlatValue::float(*value));
    }
    record.insert(
        format!("{INFERENCE_PREFIX}HistogramsJson"),
        FlatValue::Str(to_json(&scrape.histograms)),
    );
    record.insert(
        format!("{INFERENCE_PREFIX}ConfigJson"),
        FlatValue::Str(to_json(&scrape.config)),
    );
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AcceleratorRecord, LinkBandwidth, ProcessRecord, TimedValue};

    fn device(util: i64) -> AcceleratorRecord {
        AcceleratorRecord {
            utilization_gpu: TimedValue::new(util, 10),
            memory_used_bytes: TimedValue::new(util * 1024, 11),
            nvlink_bandwidth: vec![LinkBandwidth {
                link: 0,
                tx_bytes: 5,
                rx_bytes: 6,
            }],
            ..Default::default()
        }
    }

    fn process(pid: i64) -> ProcessRecord {
        ProcessRecord {
            pid: TimedValue::new(pid, 1),
            name: TimedValue::new(format!("p{pid}"), 1),
            ..Default::default()
        }
    }

    fn indexed_keys(record: &FlatRecord, prefix: &str) -> Vec<String> {
        record
            .keys()
            .filter(|k| {
                k.strip_prefix(prefix)
                    .and_then(|rest| rest.chars().next())
                    .is_some_and(|c| c.is_ascii_digit())
            })
            .cloned()
            .collect()
    }

    #[test]
    fn empty_accelerator_list_has_zero_count_and_no_indexed_keys() {
        let snapshot = Snapshot {
            timestamp: 1,
            ..Default::default()
        };
        let record = flatten(&snapshot, &FlattenOptions::default());

        assert_eq!(record[ACCELERATOR_COUNT_KEY], FlatValue::Int(0));
        assert_eq!(record[PROCESS_COUNT_KEY], FlatValue::Int(0));
        assert!(indexed_keys(&record, ACCELERATOR_PREFIX).is_empty());
        assert!(indexed_keys(&record, PROCESS_PREFIX).is_empty());
    }

    #[test]
    fn each_device_field_lands_under_its_index() {
        let snapshot = Snapshot {
            timestamp: 1,
            accelerators: vec![device(30), device(70)],
            ..Default::default()
        };
        let record = flatten(&snapshot, &FlattenOptions::default());

        assert_eq!(record[ACCELERATOR_COUNT_KEY], FlatValue::Int(2));
        for (i, dev) in snapshot.accelerators.iter().enumerate() {
            for field in ACCELERATOR_FIELDS {
                let (value, ts) = (field.read)(dev);
                assert_eq!(record[&format!("nvidia{i}{}", field.key)], value);
                assert_eq!(record[&format!("nvidia{i}{}T", field.key)], FlatValue::Int(ts));
            }
        }
        assert_eq!(record["nvidia1UtilizationGpu"], FlatValue::Int(70));
        assert!(!record.contains_key("nvidia2UtilizationGpu"));
    }

    #[test]
    fn nested_device_lists_become_json_strings() {
        let snapshot = Snapshot {
            accelerators: vec![device(1)],
            ..Default::default()
        };
        let record = flatten(&snapshot, &FlattenOptions::default());

        let FlatValue::Str(text) = &record["nvidia0NvlinkBandwidthJson"] else {
            panic!("expected string");
        };
        let links: Vec<LinkBandwidth> = serde_json::from_str(text).unwrap();
        assert_eq!(links[0].rx_bytes, 6);
        assert_eq!(record["nvidia0ProcessesJson"], FlatValue::Str("[]".into()));
    }

    #[test]
    fn process_groups_are_capped_but_count_is_true_length() {
        let snapshot = Snapshot {
            processes: (1..=5).map(process).collect(),
            ..Default::default()
        };
        let opts = FlattenOptions {
            max_processes: 2,
            ..Default::default()
        };
        let record = flatten(&snapshot, &opts);

        assert_eq!(record[PROCESS_COUNT_KEY], FlatValue::Int(5));
        assert_eq!(record["process1Pid"], FlatValue::Int(2));
        assert!(!record.contains_key("process2Pid"));
    }

    #[test]
    fn json_layout_emits_lists_whole() {
        let snapshot = Snapshot {
            accelerators: vec![device(1), device(2)],
            processes: vec![process(9)],
            ..Default::default()
        };
        let opts = FlattenOptions {
            layout: RecordLayout::Json,
            ..Default::default()
        };
        let record = flatten(&snapshot, &opts);

        assert!(indexed_keys(&record, ACCELERATOR_PREFIX).is_empty());
        assert!(indexed_keys(&record, PROCESS_PREFIX).is_empty());
        assert_eq!(record[ACCELERATOR_COUNT_KEY], FlatValue::Int(2));

        let FlatValue::Str(text) = &record[ACCELERATOR_JSON_KEY] else {
            panic!("expected string");
        };
        let back: Vec<AcceleratorRecord> = serde_json::from_str(text).unwrap();
        assert_eq!(back, snapshot.accelerators);
        assert!(record.contains_key(PROCESS_JSON_KEY));
    }

    #[test]
    fn container_fields_only_when_present() {
        let mut snapshot = Snapshot::default();
        let record = flatten(&snapshot, &FlattenOptions::default());
        assert!(!record.contains_key("cCpuTime"));

        snapshot.container = Some(Default::default());
        let record = flatten(&snapshot, &FlattenOptions::default());
        assert!(record.contains_key("cCpuTime"));
        assert!(record.contains_key("cCpuTimeT"));
    }

    #[test]
    fn inference_scrape_is_prefixed() {
        let mut scrape = ScrapeResult::unavailable(5);
        scrape.available = true;
        scrape.scalars.insert("system_requests_running".into(), 3.0);
        scrape.sums.insert("latency_ttft_s".into(), 1.5);
        scrape.counts.insert("latency_ttft_s".into(), 4.0);
        let snapshot = Snapshot {
            inference: Some(scrape),
            ..Default::default()
        };
        let record = flatten(&snapshot, &FlattenOptions::default());

        assert_eq!(record["vllmAvailable"], FlatValue::Bool(true));
        assert_eq!(record["vllmTimestamp"], FlatValue::Int(5));
        assert_eq!(record["vllm_system_requests_running"], FlatValue::Float(3.0));
        assert_eq!(record["vllm_latency_ttft_s_sum"], FlatValue::Float(1.5));
        assert_eq!(record["vllm_latency_ttft_s_count"], FlatValue::Float(4.0));
        assert_eq!(record["vllmHistogramsJson"], FlatValue::Str("{}".into()));
    }

    #[test]
    fn unavailable_scrape_only_reports_status() {
        let snapshot = Snapshot {
            inference: Some(ScrapeResult::unavailable(9)),
            ..Default::default()
        };
        let record = flatten(&snapshot, &FlattenOptions::default());
        assert_eq!(record["vllmAvailable"], FlatValue::Bool(false));
        assert!(!record.contains_key("vllmHistogramsJson"));
    }

    #[test]
    fn flattening_is_deterministic() {
        let snapshot = Snapshot {
            timestamp: 42,
            accelerators: vec![device(3)],
            processes: vec![process(1), process(2)],
            ..Default::default()
        };
        let opts = FlattenOptions::default();
        let a = flatten(&snapshot, &opts);
        let b = flatten(&snapshot, &opts);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn layout_parses_from_text() {
        assert_eq!("JSON".parse::<RecordLayout>(), Ok(RecordLayout::Json));
        assert_eq!("flatten".parse::<RecordLayout>(), Ok(RecordLayout::Flatten));
        assert!("tree".parse::<RecordLayout>().is_err());
    }
}
