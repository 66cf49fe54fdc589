use chatvault_core::Database;
use serde_json::json;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
    dump_dir: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");
        let dump_dir = base.join("dump");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_data).expect("failed to create XDG_DATA_HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");
        fs::create_dir_all(&dump_dir).expect("failed to create dump dir");

        seed_dump_fixture(&dump_dir);

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
            dump_dir,
        }
    }

    fn db_path(&self) -> PathBuf {
        self.xdg_data.join("chatvault/data.db")
    }
}

fn seed_dump_fixture(dump_dir: &std::path::Path) {
    let mut file =
        fs::File::create(dump_dir.join("100.jsonl")).expect("failed to create dump fixture");
    let records = [
        json!({
            "message_id": 1, "chat_id": 100, "user_id": 200,
            "username": "ann", "text": "hello",
            "timestamp": 1_700_000_001,
            "chat_name": "Fixture Chat", "chat_type": "group",
        }),
        json!({
            "message_id": 2, "chat_id": 100, "user_id": 201,
            "first_name": "Bob", "text": "hi there",
            "timestamp": 1_700_000_002,
        }),
        json!({
            "message_id": 3, "chat_id": 100, "user_id": 200,
            "text": "re: hi there", "reply_to_message_id": 2,
            "timestamp": 1_700_000_003,
        }),
    ];
    for record in records {
        writeln!(file, "{}", record).expect("failed to write dump fixture");
    }
}

fn run_bin(env: &CliTestEnv, bin_name: &str, args: &[&str]) -> Output {
    let bin_path = match bin_name {
        "chatvault" => PathBuf::from(assert_cmd::cargo::cargo_bin!("chatvault")),
        "chatvault-sync" => PathBuf::from(assert_cmd::cargo::cargo_bin!("chatvault-sync")),
        _ => panic!("unsupported binary in test harness: {bin_name}"),
    };

    let mut command = Command::new(bin_path);

    command
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute {bin_name}: {e}"))
}

fn assert_success(bin_name: &str, args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "{bin_name} {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

#[test]
fn sync_ingests_dump_and_populates_db() {
    let env = CliTestEnv::new();
    let dump_arg = env.dump_dir.to_string_lossy().into_owned();

    let output = run_bin(&env, "chatvault-sync", &[&dump_arg]);
    assert_success("chatvault-sync", &[&dump_arg], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Discovered 1 chat dump(s)"));
    assert!(
        stdout.contains("Sync complete:"),
        "expected sync summary in stdout, got:\n{stdout}"
    );
    assert!(stdout.contains("Messages saved:   3"));

    let db_path = env.db_path();
    assert!(
        db_path.exists(),
        "database file should exist at {}",
        db_path.display()
    );

    let db = Database::open(&db_path).expect("failed to open db");
    db.migrate().expect("failed to migrate db");

    assert_eq!(db.count_messages(Some(100)).expect("count"), 3);
    assert_eq!(db.watermark(100).expect("watermark"), Some(3));

    let chat = db.get_chat(100).expect("chat query").expect("chat row");
    assert_eq!(chat.name.as_deref(), Some("Fixture Chat"));
}

#[test]
fn second_sync_is_incremental_and_status_reports_totals() {
    let env = CliTestEnv::new();
    let dump_arg = env.dump_dir.to_string_lossy().into_owned();

    let first = run_bin(&env, "chatvault-sync", &[&dump_arg]);
    assert_success("chatvault-sync", &[&dump_arg], &first);

    // Replaying the same dump must save nothing and skip nothing: the
    // watermark bounds the fetch before records even reach the engine.
    let second = run_bin(&env, "chatvault-sync", &[&dump_arg]);
    assert_success("chatvault-sync", &[&dump_arg], &second);
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert!(stdout.contains("Messages saved:   0"));

    let status = run_bin(&env, "chatvault", &[]);
    assert_success("chatvault", &[], &status);
    let status_stdout = String::from_utf8_lossy(&status.stdout);
    assert!(status_stdout.contains("Chats (1):"));
    assert!(status_stdout.contains("Fixture Chat"));
    assert!(status_stdout.contains("Total messages: 3"));
    assert!(status_stdout.contains("client"));
}

#[test]
fn dry_run_discovers_without_writing() {
    let env = CliTestEnv::new();
    let dump_arg = env.dump_dir.to_string_lossy().into_owned();

    let output = run_bin(&env, "chatvault-sync", &["--dry-run", &dump_arg]);
    assert_success("chatvault-sync", &["--dry-run", &dump_arg], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("- chat 100"));
    assert!(stdout.contains("Dry run - no sync performed"));

    let db = Database::open(&env.db_path()).expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    assert_eq!(db.count_messages(None).expect("count"), 0);
}
