use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn cli_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("hibf_cli"))
}

fn write_fasta(path: &Path, seed: usize, len: usize) {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut seq = String::with_capacity(len);
    let mut x = seed as u64 * 2654435761 + 1;
    for _ in 0..len {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        seq.push(bases[(x % 4) as usize] as char);
    }
    fs::write(path, format!(">seq{seed}\n{seq}\n")).unwrap();
}

#[test]
fn layout_build_info() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path();

    let mut counts = String::from("# name\tcount\n");
    for (i, len) in [400usize, 120, 60, 30].iter().enumerate() {
        let fa = dir.join(format!("bin{i}.fa"));
        write_fasta(&fa, i + 1, *len);
        counts.push_str(&format!("{}\t{}\n", fa.display(), len));
    }
    let counts_path = dir.join("counts.tsv");
    fs::write(&counts_path, counts).unwrap();
    let layout_path = dir.join("layout.tsv");

    cli_cmd()
        .args(["layout", "--counts"])
        .arg(&counts_path)
        .arg("--output")
        .arg(&layout_path)
        .args(["--tmax", "64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 user bins"));

    let text = fs::read_to_string(&layout_path).unwrap();
    assert!(text.starts_with("## hibf layout"));
    assert!(text.contains("## t_max = 64"));

    let prefix = dir.join("out").join("idx_");
    cli_cmd()
        .args(["build", "--layout"])
        .arg(&layout_path)
        .args(["--kmer-size", "12", "--out-prefix"])
        .arg(&prefix)
        .assert()
        .success()
        .stdout(predicate::str::contains("user_bins=4"));

    assert!(dir.join("out").join("idx_hibf.out").exists());
    assert!(dir.join("out").join("idx_position_mapping.out").exists());
    assert!(dir.join("out").join("idx_manifest.json").exists());

    cli_cmd()
        .args(["info", "--prefix"])
        .arg(&prefix)
        .assert()
        .success()
        .stdout(predicate::str::contains("level 0: bins=64"))
        .stdout(predicate::str::contains("checksums: ok"));
}

#[test]
fn search_writes_stats_file() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path();
    let counts: String = (0..300).map(|i| format!("ub{i}\t{}\n", 1000 + i * 7)).collect();
    let counts_path = dir.join("counts.tsv");
    fs::write(&counts_path, counts).unwrap();
    let layout_path = dir.join("layout.tsv");

    cli_cmd()
        .args(["layout", "--counts"])
        .arg(&counts_path)
        .arg("--output")
        .arg(&layout_path)
        .args(["--tmax", "200", "--determine-best-tmax", "--force-all-binnings"])
        .assert()
        .success();

    let stats = fs::read_to_string(dir.join("layout.tsv.stats")).unwrap();
    assert!(stats.starts_with("## ### Parameters ###"));
    assert!(stats.trim_end().lines().last().unwrap().starts_with("# Best t_max (regarding expected query runtime): "));
}

#[test]
fn force_all_requires_search() {
    let tmp = tempdir().expect("tempdir");
    let counts_path = tmp.path().join("counts.tsv");
    fs::write(&counts_path, "a\t10\n").unwrap();
    cli_cmd()
        .args(["layout", "--counts"])
        .arg(&counts_path)
        .arg("--force-all-binnings")
        .assert()
        .failure();
}

#[test]
fn build_fails_on_missing_sequence_file() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path();
    let missing = dir.join("missing.fa");
    let counts_path = dir.join("counts.tsv");
    fs::write(&counts_path, format!("{}\t10\n", missing.display())).unwrap();
    let layout_path = dir.join("layout.tsv");

    cli_cmd()
        .args(["layout", "--counts"])
        .arg(&counts_path)
        .arg("--output")
        .arg(&layout_path)
        .assert()
        .success();

    let prefix = dir.join("idx_");
    cli_cmd()
        .args(["build", "--layout"])
        .arg(&layout_path)
        .arg("--out-prefix")
        .arg(&prefix)
        .assert()
        .failure()
        .stderr(predicate::str::contains("consistency"));
    assert!(!dir.join("idx_manifest.json").exists());
}

#[test]
fn build_accepts_overlap_and_ignores_it() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path();
    let fa = dir.join("one.fa");
    write_fasta(&fa, 7, 200);
    let counts_path = dir.join("counts.tsv");
    fs::write(&counts_path, format!("{}\t200\n", fa.display())).unwrap();
    let layout_path = dir.join("layout.tsv");

    cli_cmd()
        .args(["layout", "--counts"])
        .arg(&counts_path)
        .arg("--output")
        .arg(&layout_path)
        .assert()
        .success();

    let plain = dir.join("plain_");
    cli_cmd()
        .args(["build", "--layout"])
        .arg(&layout_path)
        .args(["--kmer-size", "12", "--out-prefix"])
        .arg(&plain)
        .assert()
        .success();

    let overlapped = dir.join("overlap_");
    cli_cmd()
        .args(["build", "--layout"])
        .arg(&layout_path)
        .args(["--kmer-size", "12", "-l", "50", "--out-prefix"])
        .arg(&overlapped)
        .assert()
        .success()
        .stderr(predicate::str::contains("--overlap has no effect"));

    let filters = |prefix: &Path| {
        let mut p = prefix.as_os_str().to_os_string();
        p.push("hibf.out");
        fs::read(p).unwrap()
    };
    assert_eq!(filters(&plain), filters(&overlapped));
}
