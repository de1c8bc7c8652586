use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn resources_fixture() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "images:\n  default: img-1\n\
         nodes_inventory:\n  m1.small: 20\n\
         network: galaxy-net\n\
         sshkey: cloud2\n\
         deployment:\n  compute:\n    flavor: m1.small\n    count: 10\n"
    )
    .unwrap();
    file
}

#[test]
fn splits_resources_and_prints_to_stdout() {
    let fixture = resources_fixture();
    Command::cargo_bin("vgcn-split")
        .unwrap()
        .arg("-r")
        .arg(fixture.path())
        .arg("-f")
        .arg("0.3")
        .assert()
        .success()
        .stdout(predicate::str::contains("compute-htcondor-secondary"));
}

#[test]
fn zero_fraction_reproduces_the_input_groups() {
    let fixture = resources_fixture();
    Command::cargo_bin("vgcn-split")
        .unwrap()
        .arg("-r")
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("compute").and(predicate::str::contains("secondary").not()));
}

#[test]
fn out_of_range_fraction_fails_with_config_exit_code() {
    let fixture = resources_fixture();
    Command::cargo_bin("vgcn-split")
        .unwrap()
        .arg("-r")
        .arg(fixture.path())
        .arg("-f")
        .arg("1.5")
        .assert()
        .code(3);
}

#[test]
fn missing_resources_file_fails_with_config_exit_code() {
    Command::cargo_bin("vgcn-split")
        .unwrap()
        .arg("-r")
        .arg("/no/such/file.yaml")
        .assert()
        .code(3);
}
