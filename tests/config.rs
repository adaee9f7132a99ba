use dom_session::{config::ErrorReporting, Configuration, Error};
use std::io::Write as _;
use tempfile::NamedTempFile;

fn toml_file(content: &str) -> NamedTempFile {
	let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
	file.write_all(content.as_bytes()).unwrap();
	file
}

#[test]
fn defaults() {
	let config = Configuration::default();
	assert_eq!(config.two_phase_threshold, 5000);
	assert_eq!(config.ack_tolerance, 5);
	assert!(!config.ajax_puzzle);
	assert_eq!(config.session_timeout, Some(600));
	assert_eq!(config.keep_alive(), 300);
	assert_eq!(config.error_reporting, ErrorReporting::ErrorMessage);
	assert_eq!(config.javascript_class, "Wt");
	assert_eq!(config.application_class, "Wt");
}

#[test]
fn file_overrides_defaults() {
	let file = toml_file(
		r#"
two_phase_threshold = 100
ajax_puzzle = true
session_timeout = 90
error_reporting = "error_message_with_stack"
application_class = "App"
"#,
	);

	let config = Configuration::load(Some(file.path())).unwrap();
	assert_eq!(config.two_phase_threshold, 100);
	assert!(config.ajax_puzzle);
	assert_eq!(config.keep_alive(), 45);
	assert_eq!(config.error_reporting, ErrorReporting::ErrorMessageWithStack);
	assert_eq!(config.application_class, "App");
	assert_eq!(config.ack_tolerance, 5);
	assert_eq!(config.javascript_class, "Wt");
}

#[test]
fn environment_overrides_file() {
	let file = toml_file("server_push_timeout = 20\nindicator_timeout = 250\n");
	std::env::set_var("DOM_SESSION__SERVER_PUSH_TIMEOUT", "75");

	let config = Configuration::load(Some(file.path())).unwrap();
	std::env::remove_var("DOM_SESSION__SERVER_PUSH_TIMEOUT");
	assert_eq!(config.server_push_timeout, 75);
	assert_eq!(config.indicator_timeout, 250);
}

#[test]
fn wrong_types_are_reported() {
	let file = toml_file("two_phase_threshold = \"lots\"\n");
	assert!(matches!(Configuration::load(Some(file.path())), Err(Error::Config(_))));
}

#[test]
fn missing_file_is_reported() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("absent.toml");
	assert!(matches!(Configuration::load(Some(&path)), Err(Error::Config(_))));
}
