//! Integration tests for layered configuration loading

use figment::Jail;
use std::time::Duration;
use te300x_daq::config::{AnalyserConfig, DEFAULT_CONFIG_PATH};
use te300x_daq::error::AnalyserError;
use te300x_daq::hardware::{AcquisitionMode, DataFormat, Mode};

#[test]
fn test_missing_file_uses_defaults() {
    Jail::expect_with(|_jail| {
        let config = AnalyserConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
        assert_eq!(config, AnalyserConfig::default());
        Ok(())
    });
}

#[test]
fn test_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "bench.toml",
            r#"
                [connection]
                port = "/dev/ttyACM3"
                timeout_ms = 1500

                [sweep]
                fmin_hz = 1e6
                fmax_hz = 2e6
                points = 101
                format = "recZ"
                mode = "transmission"
                acquisition = "incremental"
            "#,
        )?;

        let config = AnalyserConfig::load_from("bench.toml").map_err(|e| e.to_string())?;
        assert_eq!(config.connection.port, "/dev/ttyACM3");
        assert_eq!(config.connection.timeout(), Duration::from_millis(1500));
        assert_eq!(config.connection.baud_rate, 115_200);
        assert_eq!(config.sweep.points, 101);
        assert_eq!(config.sweep.format, DataFormat::RectangularImpedance);
        assert_eq!(config.sweep.mode, Mode::Transmission);
        assert_eq!(config.sweep.acquisition, AcquisitionMode::Incremental);
        // Untouched keys keep their defaults
        assert_eq!(config.sweep.averaging, 16);
        assert_eq!(config.storage.prefix, "ZTE");
        assert!(config.validate().is_ok());
        Ok(())
    });
}

#[test]
fn test_environment_overrides_file() {
    Jail::expect_with(|jail| {
        std::fs::create_dir_all("config").map_err(|e| e.to_string())?;
        jail.create_file(
            DEFAULT_CONFIG_PATH,
            r#"
                [connection]
                port = "/dev/ttyUSB0"

                [sweep]
                points = 101
            "#,
        )?;
        jail.set_env("TE300X_CONNECTION__PORT", "/dev/ttyUSB7");
        jail.set_env("TE300X_SWEEP__POINTS", "250");
        jail.set_env("TE300X_APPLICATION__LOG_LEVEL", "debug");

        let config = AnalyserConfig::load().map_err(|e| e.to_string())?;
        assert_eq!(config.connection.port, "/dev/ttyUSB7");
        assert_eq!(config.sweep.points, 250);
        assert_eq!(config.application.log_level, "debug");
        Ok(())
    });
}

#[test]
fn test_wrong_type_is_a_config_error() {
    Jail::expect_with(|jail| {
        jail.create_file("bad.toml", "[sweep]\npoints = \"many\"\n")?;
        let result = AnalyserConfig::load_from("bad.toml");
        assert!(matches!(result, Err(AnalyserError::Config(_))));
        Ok(())
    });
}

#[test]
fn test_loaded_values_are_validated() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "inverted.toml",
            "[sweep]\nfmin_hz = 5e6\nfmax_hz = 1e6\n",
        )?;
        let config = AnalyserConfig::load_from("inverted.toml").map_err(|e| e.to_string())?;
        assert!(matches!(
            config.validate(),
            Err(AnalyserError::Configuration(_))
        ));

        jail.set_env("TE300X_CONNECTION__BAUD_RATE", "57600");
        let config = AnalyserConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
        assert!(config.validate().is_err());
        Ok(())
    });
}

#[test]
fn test_shipped_configuration_is_valid() {
    // Inside a jail so no other test's environment leaks in
    Jail::expect_with(|_jail| {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/te300x.toml");
        let config = AnalyserConfig::load_from(path).map_err(|e| e.to_string())?;
        config.validate().map_err(|e| e.to_string())?;
        assert_eq!(config.sweep.acquisition, AcquisitionMode::Bulk);
        assert_eq!(config.sweep.format, DataFormat::PolarImpedance);
        Ok(())
    });
}
