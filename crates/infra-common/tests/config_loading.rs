use std::fs;
use std::path::PathBuf;

use cellgate_infra_common::{load_config, load_config_with_prefix, Error};

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}.toml", name, std::process::id()));
    fs::write(&path, contents).unwrap();
    path
}

const SAMPLE: &str = r#"
[sip]
username = "1001"
password = "secret"
domain = "pbx.example.net"
local_port = 5070

[media]
rtp_port_min = 30000
rtp_port_max = 30100

[media.echo]
enabled = false

[bridge]
sip_target = "900"
cellular_dial_timeout_secs = 20

[logging]
level = "debug"
"#;

#[test]
fn test_file_sections_are_applied() {
    let path = write_temp("cellgate-sample", SAMPLE);
    let config = load_config(&path).unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(config.sip.username, "1001");
    assert_eq!(config.sip.domain, "pbx.example.net");
    assert_eq!(config.sip.local_port, 5070);
    assert_eq!(config.media.rtp_port_min, 30000);
    assert!(!config.media.echo.enabled);
    // untouched fields keep their defaults
    assert_eq!(config.media.jitter_capacity, 8);
    assert_eq!(config.bridge.sip_target, "900");
    assert_eq!(config.bridge.cellular_dial_timeout().as_secs(), 20);
    assert_eq!(config.bridge.sip_call_timeout().as_secs(), 30);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_environment_overrides_file() {
    let path = write_temp("cellgate-env", SAMPLE);
    std::env::set_var("CGTESTENV__BRIDGE__SIP_TARGET", "777");
    std::env::set_var("CGTESTENV__MEDIA__RTP_PORT_MAX", "30200");
    let config = load_config_with_prefix(Some(&path), "CGTESTENV").unwrap();
    fs::remove_file(&path).ok();

    assert_eq!(config.bridge.sip_target, "777");
    assert_eq!(config.media.rtp_port_max, 30200);
    assert_eq!(config.sip.username, "1001");
}

#[test]
fn test_invalid_section_is_rejected() {
    let path = write_temp(
        "cellgate-invalid",
        r#"
[sip]
username = "1001"
domain = "pbx.example.net"

[media]
rtp_port_min = 20000
rtp_port_max = 10000
"#,
    );
    let err = load_config(&path).unwrap_err();
    fs::remove_file(&path).ok();

    assert!(matches!(err, Error::Config(ref msg) if msg.contains("[media]")));
}

#[test]
fn test_malformed_toml() {
    let path = write_temp("cellgate-malformed", "[sip\nusername = ");
    let err = load_config(&path).unwrap_err();
    fs::remove_file(&path).ok();
    assert!(matches!(err, Error::Config(_)));
}
