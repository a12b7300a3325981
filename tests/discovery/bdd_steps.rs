//! BDD step definitions for environment discovery.

use hostkit::{Discovery, DiscoveryError};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{Detected, DiscoveryContext, linux_instance};

fn record(context: &DiscoveryContext, result: Result<String, DiscoveryError>) {
    let detected = match result {
        Ok(value) => Detected::Value(value),
        Err(DiscoveryError::Detection { fact, stderr }) => Detected::Failed {
            fact: fact.to_owned(),
            message: stderr,
        },
        Err(other) => panic!("unexpected discovery error: {other}"),
    };
    *context.outcome.borrow_mut() = Some(detected);
}

#[given("a linux instance named \"{name}\"")]
fn linux_instance_named(discovery_context: &DiscoveryContext, name: String) {
    discovery_context.replace_instance(linux_instance(&name));
}

#[given("the directory \"{path}\" is writable")]
fn writable_directory(discovery_context: &DiscoveryContext, path: String) {
    discovery_context
        .host
        .on(&format!("test -d {path} && test -w {path}"), 0, "", "");
}

#[given("the host answers \"{pattern}\" with \"{stdout}\"")]
fn host_answers(discovery_context: &DiscoveryContext, pattern: String, stdout: String) {
    discovery_context
        .host
        .on(&pattern, 0, &format!("{stdout}\n"), "");
}

#[given("the host lists interpreters \"{paths}\"")]
fn host_lists_interpreters(discovery_context: &DiscoveryContext, paths: String) {
    let listed: Vec<&str> = paths.split(',').collect();
    let first = listed.first().copied().unwrap_or_default();
    discovery_context
        .host
        .on("command -v php", 0, &format!("{first}\n"), "");
    discovery_context
        .host
        .on("for f in /usr/bin/php*", 0, &listed.join("\n"), "");
}

#[given("the interpreter \"{path}\" reports version \"{version}\"")]
fn interpreter_reports(discovery_context: &DiscoveryContext, path: String, version: String) {
    discovery_context
        .host
        .on(&format!("{path} -r"), 0, &version, "");
}

#[given("the operator picks choice \"{index}\"")]
fn operator_picks(discovery_context: &DiscoveryContext, index: usize) {
    discovery_context.prompter.push_select(index);
}

#[when("I detect the web root")]
fn detect_web_root(discovery_context: &DiscoveryContext) {
    let result = {
        let mut access = discovery_context.access.borrow_mut();
        Discovery::new(&mut *access).and_then(|mut discovery| discovery.detect_webroot())
    };
    record(discovery_context, result);
}

#[when("I select the PHP interpreter")]
fn select_interpreter(discovery_context: &DiscoveryContext) {
    let mut prompter = discovery_context.prompter.clone();
    let result = {
        let mut access = discovery_context.access.borrow_mut();
        Discovery::new(&mut *access)
            .and_then(|mut discovery| discovery.select_php(&mut prompter))
            .map(|candidate| candidate.path)
    };
    record(discovery_context, result);
}

#[when("I detect the distribution twice")]
fn detect_distribution_twice(discovery_context: &DiscoveryContext) {
    let result = {
        let mut access = discovery_context.access.borrow_mut();
        Discovery::new(&mut *access).and_then(|mut discovery| {
            discovery.detect_distro()?;
            discovery.detect_distro()
        })
    };
    record(discovery_context, result);
}

#[then("the detected value is \"{expected}\"")]
fn detected_value(discovery_context: &DiscoveryContext, expected: String) {
    assert_eq!(discovery_context.outcome(), Detected::Value(expected));
}

#[then("detection fails for \"{fact}\"")]
fn detection_fails(discovery_context: &DiscoveryContext, fact: String) {
    let Detected::Failed { fact: failed, message } = discovery_context.outcome() else {
        panic!("detection of {fact} should fail");
    };
    assert_eq!(failed, fact);
    assert!(!message.is_empty(), "failure should carry the probe's stderr");
}

#[then("the fact \"{key}\" is \"{value}\"")]
fn fact_is(discovery_context: &DiscoveryContext, key: String, value: String) {
    assert_eq!(discovery_context.fact(&key), Some(value));
}

#[then("the fact \"{key}\" is not recorded")]
fn fact_is_absent(discovery_context: &DiscoveryContext, key: String) {
    assert_eq!(discovery_context.fact(&key), None);
}

#[then("the operator chose between \"{count}\" interpreters")]
fn operator_chose_between(discovery_context: &DiscoveryContext, count: usize) {
    let offered = discovery_context.prompter.choices();
    assert_eq!(offered.len(), 1, "expected exactly one selection prompt");
    assert_eq!(offered.first().map(Vec::len), Some(count));
}

#[then("the host ran \"{pattern}\" \"{count}\" times")]
fn host_ran(discovery_context: &DiscoveryContext, pattern: String, count: usize) {
    assert_eq!(discovery_context.host.count_matching(&pattern), count);
}
