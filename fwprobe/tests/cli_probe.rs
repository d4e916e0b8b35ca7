use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn fixture(path: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(path)
}

fn probe_cmd(model: &str) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fwprobe"));
    cmd.env("NO_COLOR", "1").arg("probe").arg(fixture(model));
    cmd
}

#[test]
fn probe_accepts_published_web_server() {
    probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "outside", "--src", "0.0.0.0/0", "--dst", "10.0.0.5"])
        .args(["--proto", "tcp", "--dport", "eq 80"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "probe equipment=asa-edge src=0.0.0.0/0 dst=10.0.0.5 paths=1",
        ))
        .stdout(predicate::str::contains("path 0 egress=dmz"))
        .stdout(predicate::str::contains(
            "   * access-list OUTSIDE_IN extended permit tcp any 10.0.0.0/24 eq 80 => ACCEPT",
        ))
        .stdout(predicate::str::contains("  out dmz (unfiltered): ACCEPT"))
        .stdout(predicate::str::contains("verdict: ACCEPT"));
}

#[test]
fn probe_range_is_split_and_partially_accepted() {
    probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "outside", "--src", "0.0.0.0/0", "--dst", "10.0.0.0/23"])
        .args(["--proto", "tcp", "--dport", "eq www"])
        .assert()
        .success()
        .stdout(predicate::str::contains("paths=2"))
        .stdout(predicate::str::contains("path 1 egress=inside"))
        .stdout(predicate::str::contains("verdict: MAY ACCEPT"));
}

#[test]
fn probe_blocked_by_quick_table_rule() {
    probe_cmd("fixtures/pf-gateway.toml")
        .args(["--in", "em0", "--src", "198.51.100.7", "--dst", "10.2.0.10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("  in em0 (wan): DENY"))
        .stdout(predicate::str::contains(
            "   * @0 block quick in on em0 from <badhosts> to any => DENY",
        ))
        .stdout(predicate::str::contains("path 0 egress=-"))
        .stdout(predicate::str::contains(
            "  note: outbound filter not evaluated: denied on ingress",
        ))
        .stdout(predicate::str::contains("verdict: DENY"));
}

#[test]
fn probe_shows_route_to_next_hop() {
    probe_cmd("fixtures/pf-gateway.toml")
        .args(["--in", "em1", "--src", "10.1.5.20", "--dst", "192.0.2.99"])
        .assert()
        .success()
        .stdout(predicate::str::contains("path 0 egress=em2 next-hop=10.2.0.1"));
}

#[test]
fn probe_match_only_drops_the_tag() {
    probe_cmd("fixtures/pf-gateway.toml")
        .args(["--in", "em0", "--src", "192.0.2.10", "--dst", "10.2.0.10"])
        .args(["--proto", "tcp", "--dport", "eq 80", "--flags", "S"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tag=WEB"))
        .stdout(predicate::str::contains("verdict: ACCEPT"));

    probe_cmd("fixtures/pf-gateway.toml")
        .args(["--in", "em0", "--src", "192.0.2.10", "--dst", "10.2.0.10"])
        .args(["--proto", "tcp", "--dport", "eq 80", "--match-only"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tag=WEB").not())
        .stdout(predicate::str::contains("verdict: DENY"));
}

#[test]
fn probe_json_output_is_structured() {
    let output = probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "outside", "--src", "192.0.2.10", "--dst", "10.0.0.5"])
        .args(["--proto", "icmp", "--icmp-type", "echo", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).expect("json report");
    assert_eq!(report["equipment"], "asa-edge");
    assert_eq!(report["verdict"], "DENY");
    assert_eq!(report["paths"][0]["incoming"]["interface"], "outside");
    assert_eq!(report["paths"][0]["incoming"]["verdict"], "DENY");
}

#[test]
fn probe_ttl_exhaustion_is_reported() {
    probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "outside", "--src", "192.0.2.10", "--dst", "10.0.0.5", "--ttl", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("  status: ttl expired"))
        .stdout(predicate::str::contains("verdict: DENY"));
}

#[test]
fn probe_rejects_unknown_interface() {
    probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "eth9", "--src", "192.0.2.10", "--dst", "10.0.0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown interface 'eth9' on asa-edge"));
}

#[test]
fn probe_rejects_bad_address() {
    probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "outside", "--src", "10.0.0.300", "--dst", "10.0.0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --src 10.0.0.300"));
}

#[test]
fn probe_rejects_mixed_families() {
    probe_cmd("fixtures/asa-edge.toml")
        .args(["--in", "outside", "--src", "2001:db8::1", "--dst", "10.0.0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("share an address family"));
}
