use bus_core::{
    BusSettings, EngineOptions, MeasurementConfig, TransferMethod, DEFAULT_BUFFER_SIZE,
    DEFAULT_TRANSFER_COUNT,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} expects a value")]
    MissingValue(String),

    #[error("invalid value {value:?} for {flag}: {reason}")]
    InvalidValue {
        flag: String,
        value: String,
        reason: String,
    },

    #[error("unknown argument {0:?}")]
    UnknownArgument(String),
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub method: TransferMethod,
    pub transfer_count: u32,
    pub buffer_size: usize,
    pub bus: BusSettings,
    pub simulate: bool,
    pub sim_delay_us: u64,
    pub sim_fail_at: Option<u64>,
    pub run_seconds: Option<u64>,
    pub report_interval: Duration,
    pub json_report: bool,
    pub json_logs: bool,
    pub log_file: Option<PathBuf>,
    pub metrics_addr: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            method: TransferMethod::default(),
            transfer_count: DEFAULT_TRANSFER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            bus: BusSettings::default(),
            simulate: false,
            sim_delay_us: 0,
            sim_fail_at: None,
            run_seconds: None,
            report_interval: Duration::from_millis(1000),
            json_report: false,
            json_logs: false,
            log_file: None,
            metrics_addr: None,
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, ConfigError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn parse<T>(flag: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn positive<T: Default + PartialEq>(flag: &str, raw: &str, parsed: T) -> Result<T, ConfigError> {
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(parsed)
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "-h" | "--help" => {
                    cfg.show_help = true;
                }
                "--method" => {
                    let raw = value(args, i, flag)?;
                    cfg.method = parse(flag, raw)?;
                    i += 1;
                }
                "--count" => {
                    let raw = value(args, i, flag)?;
                    cfg.transfer_count = positive(flag, raw, parse::<u32>(flag, raw)?)?;
                    i += 1;
                }
                "--buffer-size" => {
                    let raw = value(args, i, flag)?;
                    cfg.buffer_size = positive(flag, raw, parse::<usize>(flag, raw)?)?;
                    i += 1;
                }
                "--device" => {
                    cfg.bus.device_path = value(args, i, flag)?.to_string();
                    i += 1;
                }
                "--clock-hz" => {
                    let raw = value(args, i, flag)?;
                    cfg.bus.clock_hz = positive(flag, raw, parse::<u32>(flag, raw)?)?;
                    i += 1;
                }
                "--spi-mode" => {
                    let raw = value(args, i, flag)?;
                    let mode = parse::<u8>(flag, raw)?;
                    if mode > 3 {
                        return Err(ConfigError::InvalidValue {
                            flag: flag.to_string(),
                            value: raw.to_string(),
                            reason: "SPI mode must be 0-3".to_string(),
                        });
                    }
                    cfg.bus.mode = mode;
                    i += 1;
                }
                "--simulate" => {
                    cfg.simulate = true;
                }
                "--sim-delay-us" => {
                    let raw = value(args, i, flag)?;
                    cfg.sim_delay_us = parse(flag, raw)?;
                    i += 1;
                }
                "--sim-fail-at" => {
                    let raw = value(args, i, flag)?;
                    cfg.sim_fail_at = Some(positive(flag, raw, parse::<u64>(flag, raw)?)?);
                    i += 1;
                }
                "--run-seconds" => {
                    let raw = value(args, i, flag)?;
                    cfg.run_seconds = Some(parse(flag, raw)?);
                    i += 1;
                }
                "--report-interval-ms" => {
                    let raw = value(args, i, flag)?;
                    let ms = positive(flag, raw, parse::<u64>(flag, raw)?)?;
                    cfg.report_interval = Duration::from_millis(ms);
                    i += 1;
                }
                "--json" => {
                    cfg.json_report = true;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-file" => {
                    cfg.log_file = Some(PathBuf::from(value(args, i, flag)?));
                    i += 1;
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, i, flag)?.to_string());
                    i += 1;
                }
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }
        Ok(cfg)
    }

    pub fn measurement_config(&self) -> MeasurementConfig {
        MeasurementConfig::new(self.transfer_count, self.method)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::default().with_buffer_size(self.buffer_size)
    }

    pub fn print_help() {
        println!("bus-bench - SPI bus throughput benchmark\n");
        println!("USAGE:");
        println!("    bus-bench [OPTIONS]\n");
        println!("MEASUREMENT:");
        println!("    --method <METHOD>           write | full-duplex | sequential (default: full-duplex)");
        println!("    --count <N>                 Transfers per run (default: {DEFAULT_TRANSFER_COUNT})");
        println!("    --buffer-size <BYTES>       Bytes per transfer (default: {DEFAULT_BUFFER_SIZE})");
        println!("    --run-seconds <SECS>        Stop the run after SECS seconds");
        println!("    --report-interval-ms <MS>   Rate averaging window (default: 1000)");
        println!("\nBUS:");
        println!("    --device <PATH>             spidev node or \"auto\" (default: /dev/spidev0.0)");
        println!("    --clock-hz <HZ>             SPI clock (default: 30000000)");
        println!("    --spi-mode <0-3>            SPI mode (default: 0)");
        println!("\nSIMULATION:");
        println!("    --simulate                  Use the in-memory loopback bus");
        println!("    --sim-delay-us <US>         Extra latency per transfer");
        println!("    --sim-fail-at <N>           Fail the Nth bus call");
        println!("\nOUTPUT:");
        println!("    --json                      Print the final report as JSON");
        println!("    --json-logs                 Output logs in JSON format");
        println!("    --log-file <PATH>           Also write logs to PATH");
        println!("    --metrics-addr <ADDR>       Prometheus metrics endpoint (e.g., 0.0.0.0:9090)");
        println!("\n    -h, --help                  Print this help message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("bus-bench")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = RuntimeConfig::from_args(&args(&[])).unwrap();
        assert_eq!(cfg.method, TransferMethod::TransferFullDuplex);
        assert_eq!(cfg.transfer_count, 1000);
        assert_eq!(cfg.buffer_size, 65_536);
        assert_eq!(cfg.bus.device_path, "/dev/spidev0.0");
        assert_eq!(cfg.bus.clock_hz, 30_000_000);
        assert_eq!(cfg.bus.mode, 0);
        assert!(!cfg.simulate);
        assert_eq!(cfg.report_interval, Duration::from_secs(1));
    }

    #[test]
    fn parses_full_command_line() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--method",
            "sequential",
            "--count",
            "5",
            "--buffer-size",
            "1024",
            "--device",
            "auto",
            "--clock-hz",
            "1000000",
            "--spi-mode",
            "3",
            "--simulate",
            "--sim-delay-us",
            "250",
            "--sim-fail-at",
            "2",
            "--run-seconds",
            "10",
            "--report-interval-ms",
            "200",
            "--json",
            "--json-logs",
            "--log-file",
            "/tmp/bench.log",
            "--metrics-addr",
            "127.0.0.1:9100",
        ]))
        .unwrap();
        assert_eq!(cfg.method, TransferMethod::TransferSequential);
        assert_eq!(cfg.measurement_config().transfer_count, 5);
        assert_eq!(cfg.engine_options().buffer_size, 1024);
        assert_eq!(cfg.bus.device_path, "auto");
        assert_eq!(cfg.bus.clock_hz, 1_000_000);
        assert_eq!(cfg.bus.mode, 3);
        assert!(cfg.simulate);
        assert_eq!(cfg.sim_delay_us, 250);
        assert_eq!(cfg.sim_fail_at, Some(2));
        assert_eq!(cfg.run_seconds, Some(10));
        assert_eq!(cfg.report_interval, Duration::from_millis(200));
        assert!(cfg.json_report && cfg.json_logs);
        assert_eq!(cfg.log_file, Some(PathBuf::from("/tmp/bench.log")));
        assert_eq!(cfg.metrics_addr.as_deref(), Some("127.0.0.1:9100"));
    }

    #[test]
    fn help_flag() {
        assert!(RuntimeConfig::from_args(&args(&["-h"])).unwrap().show_help);
        assert!(RuntimeConfig::from_args(&args(&["--help"])).unwrap().show_help);
    }

    #[test]
    fn rejects_bad_values() {
        let err = RuntimeConfig::from_args(&args(&["--method", "bogus"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref flag, .. } if flag == "--method"));

        let err = RuntimeConfig::from_args(&args(&["--count", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = RuntimeConfig::from_args(&args(&["--spi-mode", "4"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = RuntimeConfig::from_args(&args(&["--buffer-size", "-1"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn missing_value_and_unknown_flag() {
        assert_eq!(
            RuntimeConfig::from_args(&args(&["--count"])).unwrap_err(),
            ConfigError::MissingValue("--count".to_string())
        );
        assert_eq!(
            RuntimeConfig::from_args(&args(&["--turbo"])).unwrap_err(),
            ConfigError::UnknownArgument("--turbo".to_string())
        );
    }
}
