//! Tests for the capability traits' shared behaviour.

use super::*;
use crate::instance::AccessType;
use crate::test_support::ScriptedHost;
use rstest::rstest;

fn access(webroot: Option<&str>) -> ShellBackedAccess<ScriptedHost> {
    let mut instance = Instance::new("shop", AccessType::Local);
    instance.webroot = webroot.map(ToOwned::to_owned);
    ShellBackedAccess::new(instance, ScriptedHost::new(), Utf8PathBuf::from("/tmp"))
}

#[rstest]
#[case(Capability::Scripting, true)]
#[case(Capability::FileTransfer, false)]
fn capabilities_answer_per_group(#[case] capability: Capability, #[case] expected: bool) {
    let capabilities = Capabilities {
        scripting: true,
        ..Capabilities::default()
    };

    assert_eq!(capabilities.supports(capability), expected);
}

#[rstest]
fn relative_paths_stay_relative_without_a_web_root() {
    assert_eq!(access(None).resolve_path("index.php"), "index.php");
}

#[rstest]
fn discovered_web_root_is_used_when_none_is_configured() {
    let mut bound = access(None);
    bound
        .instance_mut()
        .set_fact(crate::instance::facts::WEBROOT, "/var/www/html/");

    assert_eq!(bound.resolve_path("wp-config.php"), "/var/www/html/wp-config.php");
}

#[rstest]
fn create_command_quotes_arguments_and_keeps_stdin() {
    let mut bound = access(Some("/srv"));
    let shell = bound.shell().unwrap_or_else(|| panic!("shell capability"));

    let command = shell.create_command(
        "git",
        &[String::from("commit"), String::from("-m"), String::from("fix: it's done")],
        Some(Stdin::from("payload")),
    );

    assert_eq!(command.full_command_line(), "git commit -m 'fix: it'\\''s done'");
    assert!(command.has_stdin());
}

#[rstest]
fn run_command_records_non_zero_exit_without_error() {
    let host = ScriptedHost::new();
    host.on("false", 1, "", "nope");
    let mut bound = ShellBackedAccess::new(
        Instance::new("shop", AccessType::Local),
        host.clone(),
        Utf8PathBuf::from("/tmp"),
    );
    let shell = bound.shell().unwrap_or_else(|| panic!("shell capability"));
    let mut command = shell.create_command("false", &[], None);

    shell
        .run_command(&mut command)
        .unwrap_or_else(|err| panic!("run: {err}"));

    assert_eq!(command.exit_status(), Some(1));
    assert_eq!(command.stderr_string(), "nope");
}

#[rstest]
fn shell_exec_discards_output_unless_captured() {
    let host = ScriptedHost::new();
    host.on("echo hi", 0, "hi\n", "");
    let mut bound = ShellBackedAccess::new(
        Instance::new("shop", AccessType::Local),
        host,
        Utf8PathBuf::from("/tmp"),
    );
    let shell = bound.shell().unwrap_or_else(|| panic!("shell capability"));

    let quiet = shell
        .shell_exec(&[String::from("echo hi")], false)
        .unwrap_or_else(|err| panic!("exec: {err}"));
    let captured = shell
        .shell_exec(&[String::from("echo hi")], true)
        .unwrap_or_else(|err| panic!("exec: {err}"));

    assert_eq!(quiet, "");
    assert_eq!(captured, "hi\n");
}
