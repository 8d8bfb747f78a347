use mcp_hub::error::Result;
use mcp_hub::launch::{LaunchOptions, Platform, generate, venv_interpreter};
use mcp_hub::registry::{CommandSet, HttpSettings, RuntimeKind, ServerDescriptor, TransportKind};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tempfile::TempDir;

fn options(port: u16) -> LaunchOptions {
    LaunchOptions {
        port,
        transport: TransportKind::Http,
        requested_flags: Vec::new(),
    }
}

fn node_descriptor(path: impl Into<PathBuf>, start: &str) -> ServerDescriptor {
    ServerDescriptor {
        runtime: RuntimeKind::Node,
        path: path.into(),
        commands: CommandSet {
            start: Some(start.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_plain_node_script_path_is_absolutized() -> Result<()> {
    let descriptor = node_descriptor("/srv/notes", "node dist/index.js");

    let launch = generate(
        "notes",
        &descriptor,
        &HashMap::new(),
        &options(3000),
        Platform::Linux,
    )?;

    assert_eq!(launch.command, "node");
    assert_eq!(launch.args, vec!["/srv/notes/dist/index.js".to_string()]);
    assert_eq!(launch.cwd, PathBuf::from("/srv/notes"));
    assert_eq!(launch.env["PORT"], "3000");

    Ok(())
}

#[test]
fn test_python_with_venv_uses_venv_interpreter() -> Result<()> {
    // Lay out a server directory with a virtualenv interpreter in place.
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("pg_tools");
    let interpreter = venv_interpreter(&base, Platform::host());
    std::fs::create_dir_all(interpreter.parent().unwrap()).unwrap();
    std::fs::write(&interpreter, "").unwrap();

    let descriptor = ServerDescriptor {
        runtime: RuntimeKind::Python,
        path: base.clone(),
        commands: CommandSet {
            start: Some("python -m mcp_server_pg.http_server".to_string()),
            ..Default::default()
        },
        secrets: BTreeMap::from([("DATABASE_URL".to_string(), Default::default())]),
        secret_flags: BTreeMap::from([(
            "DATABASE_URL".to_string(),
            "--database-url".to_string(),
        )]),
        http: Some(HttpSettings { port: Some(3003) }),
        ..Default::default()
    };
    let secrets = HashMap::from([(
        "DATABASE_URL".to_string(),
        "postgres://localhost/demo".to_string(),
    )]);

    let launch = generate(
        "pg-tools",
        &descriptor,
        &secrets,
        &options(3003),
        Platform::host(),
    )?;

    // The interpreter is the venv one, module execution is preserved, and
    // the mapped secret rides both the argument vector and the env.
    assert_eq!(launch.command, interpreter.to_string_lossy());
    assert_eq!(
        launch.args,
        vec![
            "-m",
            "mcp_server_pg.http_server",
            "--database-url",
            "postgres://localhost/demo",
        ]
    );
    assert_eq!(launch.cwd, base);
    assert_eq!(launch.env["PORT"], "3003");
    assert_eq!(launch.env["DATABASE_URL"], "postgres://localhost/demo");

    Ok(())
}

#[test]
fn test_python_without_venv_falls_back_to_path_lookup() -> Result<()> {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("no_venv_yet");
    std::fs::create_dir_all(&base).unwrap();

    let descriptor = ServerDescriptor {
        runtime: RuntimeKind::Python,
        path: base,
        commands: CommandSet {
            start: Some("python3 -m server.main".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let launch = generate(
        "raw",
        &descriptor,
        &HashMap::new(),
        &options(3010),
        Platform::host(),
    )?;

    // No virtualenv on disk: the interpreter named in the start command is
    // kept for PATH resolution.
    assert_eq!(launch.command, "python3");
    assert_eq!(launch.args, vec!["-m", "server.main"]);

    Ok(())
}

#[test]
fn test_monorepo_keeps_relative_script_and_pins_cwd() -> Result<()> {
    let descriptor = ServerDescriptor {
        runtime: RuntimeKind::Node,
        monorepo: true,
        path: "/srv/workspace".into(),
        commands: CommandSet {
            start: Some("node packages/server-notes/dist/index.js".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let launch = generate(
        "notes",
        &descriptor,
        &HashMap::new(),
        &options(3001),
        Platform::Linux,
    )?;

    assert_eq!(launch.command, "node");
    assert_eq!(
        launch.args,
        vec!["packages/server-notes/dist/index.js".to_string()]
    );
    assert_eq!(launch.cwd, PathBuf::from("/srv/workspace"));

    Ok(())
}

#[test]
fn test_secret_flags_only_for_resolved_secrets() -> Result<()> {
    let mut descriptor = node_descriptor("/srv/multi", "node dist/index.js");
    descriptor.secret_flags = BTreeMap::from([
        ("API_KEY".to_string(), "--api-key".to_string()),
        ("EXTRA_TOKEN".to_string(), "--extra-token".to_string()),
    ]);

    // Only one of the two mapped secrets resolved.
    let secrets = HashMap::from([("API_KEY".to_string(), "k-123".to_string())]);

    let launch = generate("multi", &descriptor, &secrets, &options(3000), Platform::Linux)?;

    assert_eq!(
        launch.args,
        vec!["/srv/multi/dist/index.js", "--api-key", "k-123"]
    );
    assert!(!launch.env.contains_key("EXTRA_TOKEN"));

    Ok(())
}

#[test]
fn test_requested_flags_outside_optional_args_are_dropped() -> Result<()> {
    let mut descriptor = node_descriptor("/srv/flags", "node dist/index.js");
    descriptor.optional_args = vec!["--read-only".to_string(), "--verbose".to_string()];

    let launch_options = LaunchOptions {
        port: 3000,
        transport: TransportKind::Http,
        requested_flags: vec!["--read-only".to_string(), "--delete-everything".to_string()],
    };

    let launch = generate(
        "flags",
        &descriptor,
        &HashMap::new(),
        &launch_options,
        Platform::Linux,
    )?;

    assert_eq!(
        launch.args,
        vec!["/srv/flags/dist/index.js", "--read-only"]
    );

    Ok(())
}

#[test]
fn test_generation_is_deterministic() -> Result<()> {
    let mut descriptor = node_descriptor("/srv/stable", "node dist/index.js");
    descriptor.secret_flags = BTreeMap::from([
        ("A_KEY".to_string(), "--a-key".to_string()),
        ("B_KEY".to_string(), "--b-key".to_string()),
    ]);
    let secrets = HashMap::from([
        ("B_KEY".to_string(), "b".to_string()),
        ("A_KEY".to_string(), "a".to_string()),
    ]);

    let first = generate("stable", &descriptor, &secrets, &options(3000), Platform::Linux)?;
    let second = generate("stable", &descriptor, &secrets, &options(3000), Platform::Linux)?;

    assert_eq!(first, second);
    // Flag order follows the declaration table, not HashMap iteration.
    assert_eq!(
        first.args,
        vec![
            "/srv/stable/dist/index.js",
            "--a-key",
            "a",
            "--b-key",
            "b",
        ]
    );
    // Serialized form is byte-identical too.
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    Ok(())
}

#[test]
fn test_windows_launch_uses_absolute_node_and_backslashes() -> Result<()> {
    let descriptor = node_descriptor(r"C:\srv\demo", "node dist/index.js");

    let launch = generate(
        "demo",
        &descriptor,
        &HashMap::new(),
        &options(3000),
        Platform::Windows,
    )?;

    assert_eq!(launch.command, r"C:\Program Files\nodejs\node.exe");
    assert_eq!(launch.args, vec![r"C:\srv\demo\dist\index.js".to_string()]);

    Ok(())
}

#[test]
fn test_transport_selects_start_variant() -> Result<()> {
    let descriptor = ServerDescriptor {
        runtime: RuntimeKind::Node,
        path: "/srv/dual".into(),
        commands: CommandSet {
            start_http: Some("node dist/http.js".to_string()),
            start_sse: Some("node dist/sse.js".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let http = generate(
        "dual",
        &descriptor,
        &HashMap::new(),
        &options(3000),
        Platform::Linux,
    )?;
    assert_eq!(http.args, vec!["/srv/dual/dist/http.js".to_string()]);

    let sse_options = LaunchOptions {
        port: 3000,
        transport: TransportKind::Sse,
        requested_flags: Vec::new(),
    };
    let sse = generate(
        "dual",
        &descriptor,
        &HashMap::new(),
        &sse_options,
        Platform::Linux,
    )?;
    assert_eq!(sse.args, vec!["/srv/dual/dist/sse.js".to_string()]);

    Ok(())
}

#[test]
fn test_missing_and_blank_start_commands_are_rejected() {
    // No start command at all.
    let descriptor = ServerDescriptor {
        runtime: RuntimeKind::Node,
        path: "/srv/empty".into(),
        ..Default::default()
    };
    assert!(
        generate(
            "empty",
            &descriptor,
            &HashMap::new(),
            &options(3000),
            Platform::Linux,
        )
        .is_err()
    );

    // A start command that is only whitespace.
    let blank = node_descriptor("/srv/blank", "   ");
    assert!(
        generate(
            "blank",
            &blank,
            &HashMap::new(),
            &options(3000),
            Platform::Linux,
        )
        .is_err()
    );
}
