#![cfg(unix)]

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tomo_core::config::RemoteConfig;
use tomo_core::error::TomoError;
use tomo_core::{DoseJobOrchestrator, DoseOptions, EngineKind, ImageVolume, PlanRecord};

// 8 little-endian f32 ones: the 2 x 2 x 2 low-res grid
const WRITE_ONES: &str = r#"i=0
while [ $i -lt 8 ]; do printf '\000\000\200\077'; i=$((i+1)); done > dose.img"#;

/// ssh stand-in: logs the call, then runs the remote command locally.
/// With `ssh.drop` present the solver call dies like a lost connection.
const FAKE_SSH: &str = r#"echo "$*" >> '@ROOT@/ssh.calls'
while [ $# -gt 0 ]; do
  case "$1" in
    -o|-p|-i|-O) shift 2 ;;
    -M|-f|-N) shift ;;
    *) break ;;
  esac
done
[ $# -ge 2 ] || exit 0
if [ -f '@ROOT@/ssh.drop' ]; then
  case "$2" in *dose.cfg*) echo 'Connection reset by peer' >&2; exit 255 ;; esac
fi
exec sh -c "$2""#;

/// scp stand-in: copies with `host:` stripped and logs the copied names,
/// one line per call. With `scp.fail` present the next call fails.
const FAKE_SCP: &str = r#"while [ $# -gt 0 ]; do
  case "$1" in
    -o|-P|-i) shift 2 ;;
    -q|-p) shift ;;
    *) break ;;
  esac
done
if [ -f '@ROOT@/scp.fail' ]; then
  rm -f '@ROOT@/scp.fail'
  echo 'lost connection' >&2
  exit 1
fi
for last in "$@"; do :; done
dest="${last#*:}"
names=""
i=0
for src in "$@"; do
  i=$((i+1))
  [ "$i" -eq "$#" ] && break
  cp "${src#*:}" "$dest" || exit 1
  names="$names $(basename "${src#*:}")"
done
echo "${names# }" >> '@ROOT@/scp.calls'"#;

struct Host {
    tmp: TempDir,
    jobs: DoseJobOrchestrator,
    image: ImageVolume,
    plan: PlanRecord,
}

impl Host {
    /// Orchestrator whose only engine is `solver` behind fake ssh/scp,
    /// with `<tmp>/remote` standing in for the remote filesystem.
    fn new(solver: &str, timeout_secs: u64) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let blob = root.join("sino.bin");
        common::write_blob(&blob);
        let mut config = common::config(root);

        let dir = root.display().to_string();
        common::install_engine(root, "ssh", &FAKE_SSH.replace("@ROOT@", &dir));
        common::install_engine(root, "scp", &FAKE_SCP.replace("@ROOT@", &dir));
        common::install_engine(root, "remote-sadose", &solver.replace("@ROOT@", &dir));
        fs::create_dir(root.join("remote")).unwrap();

        let bin = root.join("bin");
        config.remote = Some(RemoteConfig {
            host: "calc01".into(),
            user: "physics".into(),
            root: format!("{dir}/remote"),
            executable: bin.join("remote-sadose").display().to_string(),
            ssh: bin.join("ssh").display().to_string(),
            scp: bin.join("scp").display().to_string(),
            ..Default::default()
        });
        config.remote_timeout_secs = timeout_secs;

        Self {
            jobs: DoseJobOrchestrator::new(config),
            image: common::image(),
            plan: common::plan(blob),
            tmp,
        }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn submit(&mut self) -> tomo_core::error::Result<tomo_core::DoseVolume> {
        self.jobs
            .submit_plan(&self.image, &self.plan, &DoseOptions::default())
    }

    fn lines(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.root().join(name))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Session folders created under the remote root.
    fn remote_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = fs::read_dir(self.root().join("remote"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with("tomo_"))
            .collect();
        dirs.sort();
        dirs
    }
}

#[test]
fn inputs_go_up_once_and_results_come_back() {
    let mut host = Host::new(&format!("echo \"remote $1\"\n{WRITE_ONES}"), 60);

    let first = host.submit().unwrap();
    assert!(first.data.iter().all(|&v| v == 1.0));
    assert_eq!(host.jobs.gateway_mut().discover().kind(), EngineKind::Remote);
    let second = host.submit().unwrap();
    assert_eq!(second.data, first.data);

    let mkdirs = host.lines("ssh.calls").iter().filter(|l| l.contains("mkdir -p")).count();
    assert_eq!(mkdirs, 1);
    assert_eq!(host.jobs.gateway().discoveries(), 1);

    let copies = host.lines("scp.calls");
    assert_eq!(copies.len(), 6);
    for name in ["ct.header", "ct.img", "dose.cfg", "kernel.img", "plan.img"] {
        assert!(copies[0].split(' ').any(|n| n == name), "{name} missing from {}", copies[0]);
    }
    assert_eq!(copies[1..3], ["log.txt", "dose.img"]);
    assert_eq!(copies[3], "plan.header plan.img");
    assert_eq!(copies[4..6], ["log.txt", "dose.img"]);

    let dirs = host.remote_dirs();
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].join("kernel.img").exists());
    let local = host.jobs.stager().dir().unwrap().to_path_buf();
    assert!(fs::read_to_string(local.join("log.txt")).unwrap().contains("remote dose.cfg"));
}

#[test]
fn rediscovered_engine_receives_every_input() {
    let mut host = Host::new(WRITE_ONES, 60);
    host.submit().unwrap();

    host.jobs.gateway_mut().rediscover();
    host.submit().unwrap();

    let copies = host.lines("scp.calls");
    assert!(copies[3].split(' ').any(|n| n == "ct.img"));
    assert!(copies[3].split(' ').any(|n| n == "kernel.img"));
    let dirs = host.remote_dirs();
    assert_eq!(dirs.len(), 2);
    assert!(dirs.iter().all(|d| d.join("ct.img").exists()));
}

#[test]
fn failed_push_is_repaired_on_the_next_job() {
    let mut host = Host::new(WRITE_ONES, 60);
    fs::write(host.root().join("scp.fail"), b"").unwrap();

    let err = host.submit().unwrap_err();
    assert!(matches!(err.root(), TomoError::Staging(msg) if msg.contains("lost connection")));

    host.submit().unwrap();
    let copies = host.lines("scp.calls");
    for name in ["ct.img", "dose.cfg", "kernel.img", "plan.header"] {
        assert!(copies[0].split(' ').any(|n| n == name), "{name} missing from {}", copies[0]);
    }
    let dirs = host.remote_dirs();
    assert_eq!(dirs.len(), 1);
    assert!(dirs[0].join("ct.img").exists());
}

#[test]
fn error_log_leaves_the_result_behind() {
    let mut host = Host::new("echo 'ERROR: beam model missing'\nprintf 'garbage' > dose.img", 60);

    let err = host.submit().unwrap_err();
    assert!(matches!(
        err.root(),
        TomoError::ExternalEngine { output } if output.contains("beam model missing")
    ));
    assert!(!host.lines("scp.calls").iter().any(|l| l == "dose.img"));
    let local = host.jobs.stager().dir().unwrap().to_path_buf();
    assert!(!local.join("dose.img").exists());
    assert!(local.join("log.txt").exists());
}

#[test]
fn dropped_connection_is_a_staging_error() {
    let mut host = Host::new(WRITE_ONES, 60);
    fs::write(host.root().join("ssh.drop"), b"").unwrap();

    let err = host.submit().unwrap_err();
    assert!(matches!(err.root(), TomoError::Staging(msg) if msg.contains("Connection reset")));
    assert!(!host.lines("scp.calls").iter().any(|l| l == "log.txt"));
}

#[test]
fn overrun_kills_the_solver_and_moves_to_a_new_folder() {
    let solver = format!("if [ -f '@ROOT@/slow' ]; then sleep 30; fi\n{WRITE_ONES}");
    let mut host = Host::new(&solver, 1);
    fs::write(host.root().join("slow"), b"").unwrap();

    let err = host.submit().unwrap_err();
    assert!(matches!(err.root(), TomoError::Timeout { secs: 1 }));
    assert!(host.lines("ssh.calls").iter().any(|l| l.contains("kill $(cat solver.pid)")));
    let abandoned = host.remote_dirs();
    assert_eq!(abandoned.len(), 1);
    assert!(!abandoned[0].join("solver.pid").exists());

    fs::remove_file(host.root().join("slow")).unwrap();
    let dose = host.submit().unwrap();
    assert!(dose.data.iter().all(|&v| v == 1.0));

    let dirs = host.remote_dirs();
    assert_eq!(dirs.len(), 2);
    let fresh: Vec<_> = dirs.iter().filter(|d| **d != abandoned[0]).collect();
    assert!(fresh[0].join("ct.img").exists());
    assert!(fresh[0].join("dose.img").exists());
    assert_eq!(host.jobs.gateway().discoveries(), 1);
}
