//! Entry point for the fleettop console. Parses args, resolves the target
//! backend, and dispatches the selected command.

use anyhow::anyhow;
use fleettop::poll::HOST_METRICS_INTERVAL;
use fleettop::profiles::{load_profiles, save_profiles, ProfileEntry, ProfileRequest, ResolveProfile};
use fleettop::types::ControlAction;
use fleettop::{AggregateView, FleetApi, PollWatch};
use std::env;
use std::io::{self, Write};
use std::time::Duration;
use url::Url;

// Pause between reconnect attempts after the feed drops.
const RECONNECT_PAUSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Watch,
    Agents,
    Policies,
    Host(String),
    Control(String, ControlAction),
    Block(String),
    Unblock(String),
    Apply(String, String),
}

struct ParsedArgs {
    url: Option<String>,
    token: Option<String>,
    profile: Option<String>,
    save: bool,
    demo: bool,
    dry_run: bool,
    command: Command,
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--token TOKEN|-k TOKEN] [--profile NAME|-P NAME] [--save] [--demo] [--dry-run] [http(s)://HOST:PORT] [COMMAND]\n\
         Commands:\n  \
         watch                      follow the live fleet feed (default)\n  \
         agents                     list registered agents\n  \
         policies                   list policies\n  \
         host HOSTNAME              poll one host's metrics\n  \
         control AGENT_ID ACTION    send start|restart|shutdown to an agent\n  \
         block AGENT_ID             block an agent\n  \
         unblock AGENT_ID           unblock an agent\n  \
         apply AGENT_ID POLICY_ID   apply a policy to an agent"
    )
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "fleettop".into());
    let mut url: Option<String> = None;
    let mut token: Option<String> = None;
    let mut profile: Option<String> = None;
    let mut save = false; // --save
    let mut demo = false; // --demo
    let mut dry_run = false; // --dry-run (resolve config, then exit)
    let mut rest: Vec<String> = Vec::new();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Err(usage(&prog));
            }
            "--token" | "-k" => {
                token = it.next();
            }
            "--profile" | "-P" => {
                profile = it.next();
            }
            "--save" => {
                save = true;
            }
            "--demo" => {
                demo = true;
            }
            "--dry-run" => {
                dry_run = true;
            }
            _ if arg.starts_with("--token=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        token = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with("--profile=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        profile = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with('-') => {
                return Err(format!("Unknown flag '{arg}'.\n{}", usage(&prog)));
            }
            _ => {
                if url.is_none() && (arg.starts_with("http://") || arg.starts_with("https://")) {
                    url = Some(arg);
                } else {
                    rest.push(arg);
                }
            }
        }
    }
    let command = parse_command(&prog, &rest)?;
    Ok(ParsedArgs {
        url,
        token,
        profile,
        save,
        demo,
        dry_run,
        command,
    })
}

fn parse_command(prog: &str, rest: &[String]) -> Result<Command, String> {
    let words: Vec<&str> = rest.iter().map(|s| s.as_str()).collect();
    match words.as_slice() {
        [] | ["watch"] => Ok(Command::Watch),
        ["agents"] => Ok(Command::Agents),
        ["policies"] => Ok(Command::Policies),
        ["host", name] => Ok(Command::Host(name.to_string())),
        ["control", id, action] => match ControlAction::parse(action) {
            Some(a) => Ok(Command::Control(id.to_string(), a)),
            None => Err(format!(
                "Unknown action '{action}' (expected start|restart|shutdown)."
            )),
        },
        ["block", id] => Ok(Command::Block(id.to_string())),
        ["unblock", id] => Ok(Command::Unblock(id.to_string())),
        ["apply", id, pid] => Ok(Command::Apply(id.to_string(), pid.to_string())),
        _ => Err(format!(
            "Unrecognized command '{}'.\n{}",
            rest.join(" "),
            usage(prog)
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reuse the same parsing logic for testability
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    // Data output goes to stdout, diagnostics to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    // Demo mode short-circuit (ignore other args except the command)
    if parsed.demo || matches!(parsed.profile.as_deref(), Some("demo")) {
        return run_demo_mode(&parsed).await;
    }

    let profiles_file = load_profiles();
    let req = ProfileRequest {
        profile_name: parsed.profile.clone(),
        base_url: parsed.url.clone(),
        token: parsed.token.clone(),
    };
    let resolved = req.resolve(&profiles_file);

    // Determine final connection parameters (and maybe mutated profiles to persist)
    let mut profiles_mut = profiles_file.clone();
    let (base_url, token): (String, Option<String>) = match resolved {
        ResolveProfile::Direct(u, t) => {
            // Possibly save if profile specified and --save or new entry
            if let Some(name) = parsed.profile.as_ref() {
                let existing = profiles_mut.profiles.get(name);
                match existing {
                    None => {
                        // New profile: auto-save immediately
                        profiles_mut.profiles.insert(
                            name.clone(),
                            ProfileEntry {
                                base_url: u.clone(),
                                token: t.clone(),
                            },
                        );
                        let _ = save_profiles(&profiles_mut);
                    }
                    Some(entry) => {
                        let changed = entry.base_url != u || entry.token != t;
                        if changed {
                            let overwrite = if parsed.save {
                                true
                            } else {
                                prompt_yes_no(&format!(
                                    "Overwrite existing profile '{name}'? [y/N]: "
                                ))
                            };
                            if overwrite {
                                profiles_mut.profiles.insert(
                                    name.clone(),
                                    ProfileEntry {
                                        base_url: u.clone(),
                                        token: t.clone(),
                                    },
                                );
                                let _ = save_profiles(&profiles_mut);
                            }
                        }
                    }
                }
            }
            (u, t)
        }
        ResolveProfile::Loaded(u, t) => (u, t),
        ResolveProfile::PromptSelect(mut names) => {
            // Always add demo option to list
            if !names.iter().any(|n| n == "demo") {
                names.push("demo".into());
            }
            eprintln!("Select profile:");
            for (i, n) in names.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, n);
            }
            eprint!("Enter number (or blank to abort): ");
            let _ = io::stderr().flush();
            let mut line = String::new();
            if io::stdin().read_line(&mut line).is_ok() {
                if let Ok(idx) = line.trim().parse::<usize>() {
                    if idx >= 1 && idx <= names.len() {
                        let name = &names[idx - 1];
                        if name == "demo" {
                            return run_demo_mode(&parsed).await;
                        }
                        if let Some(entry) = profiles_mut.profiles.get(name) {
                            (entry.base_url.clone(), entry.token.clone())
                        } else {
                            return Ok(());
                        }
                    } else {
                        return Ok(());
                    }
                } else {
                    return Ok(());
                }
            } else {
                return Ok(());
            }
        }
        ResolveProfile::PromptCreate(name) => {
            eprintln!("Profile '{name}' does not exist yet.");
            let base = prompt_string("Enter backend URL (http://HOST:PORT or https://...): ")?;
            let base = base.trim().to_string();
            if base.is_empty() {
                return Ok(());
            }
            // same scheme guard as the positional URL argument
            if !base.starts_with("http://") && !base.starts_with("https://") {
                eprintln!("Backend URL must start with http:// or https://.");
                return Ok(());
            }
            let tok = prompt_string("Enter bearer token (or leave blank): ")?;
            let tok_opt = if tok.trim().is_empty() {
                None
            } else {
                Some(tok.trim().to_string())
            };
            profiles_mut.profiles.insert(
                name.clone(),
                ProfileEntry {
                    base_url: base.clone(),
                    token: tok_opt.clone(),
                },
            );
            let _ = save_profiles(&profiles_mut);
            (base, tok_opt)
        }
        ResolveProfile::None => {
            eprintln!("No backend URL provided and no profiles to select.");
            return Ok(());
        }
    };

    // Config-only run: everything resolved and persisted, skip the network
    if parsed.dry_run {
        return Ok(());
    }

    run_command(&base_url, token, parsed.command).await
}

async fn run_command(
    base: &str,
    token: Option<String>,
    command: Command,
) -> anyhow::Result<()> {
    let base_url = Url::parse(base).map_err(|e| anyhow!("invalid backend URL '{base}': {e}"))?;
    let mut api = FleetApi::new(base_url)?;
    if let Some(t) = token {
        api = api.with_token(t);
    }
    match command {
        Command::Watch => watch(api).await,
        Command::Agents => list_agents(api).await,
        Command::Policies => list_policies(api).await,
        Command::Host(hostname) => follow_host(api, hostname).await,
        Command::Control(id, action) => {
            api.control(&id, action).await?;
            println!("sent {action} to {id}");
            Ok(())
        }
        Command::Block(id) => {
            api.set_blocked(&id, true).await?;
            println!("blocked {id}");
            Ok(())
        }
        Command::Unblock(id) => {
            api.set_blocked(&id, false).await?;
            println!("unblocked {id}");
            Ok(())
        }
        Command::Apply(id, pid) => {
            api.apply_policy(&id, &pid).await?;
            println!("applied {pid} to {id}");
            Ok(())
        }
    }
}

fn print_view(view: &AggregateView) {
    let Some(avg) = view.averages else { return };
    let Some(last) = view.recent.last() else { return };
    println!(
        "{:>3} hosts | avg cpu {:5.1}% ram {:5.1}% disk {:5.1}% | {} cpu {:5.1}% ram {:5.1}% disk {:5.1}%",
        view.hosts.len(),
        avg.cpu,
        avg.ram,
        avg.disk,
        last.hostname,
        last.cpu,
        last.ram,
        last.disk
    );
}

/// Follow the live feed, printing one line per applied event. Reconnects
/// after a pause if the connection drops; Ctrl-C quits.
async fn watch(api: FleetApi) -> anyhow::Result<()> {
    let (err_tx, mut err_rx) = tokio::sync::mpsc::unbounded_channel();
    eprintln!("Watching {} (Ctrl-C to quit)", api.base());
    loop {
        let tx = err_tx.clone();
        let sub = api.stream_metrics(
            |view| print_view(&view),
            move |err| {
                let _ = tx.send(err);
            },
        );
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                sub.unsubscribe();
                return Ok(());
            }
            err = err_rx.recv() => {
                sub.unsubscribe();
                if let Some(err) = err {
                    tracing::warn!(error = %err, "feed lost; reconnecting in {}s", RECONNECT_PAUSE.as_secs());
                }
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
        }
    }
}

async fn list_agents(api: FleetApi) -> anyhow::Result<()> {
    let agents = api.agents().await?;
    let now = chrono::Utc::now();
    for a in &agents {
        let seen = match a.last_seen_at() {
            Some(ts) => format!("{}s ago", (now - ts).num_seconds().max(0)),
            None => "-".into(),
        };
        let flag = if a.blocked == Some(true) { " [blocked]" } else { "" };
        println!(
            "{:<12} {:<14} {:<8} {:<12} {:<9} cpu {:5.1}% ram {:5.1}% disk {:5.1}%  {:<15} seen {}{}",
            a.id, a.host, a.env, a.region, a.status, a.cpu, a.ram, a.disk, a.ip_address, seen, flag
        );
    }
    if agents.is_empty() {
        eprintln!("no agents registered");
    }
    Ok(())
}

async fn list_policies(api: FleetApi) -> anyhow::Result<()> {
    let policies = api.policies().await?;
    for p in &policies {
        println!(
            "{:<14} {:<24} {} applied={} actions=[{}]",
            p.policy_id,
            p.name,
            if p.enabled { "enabled " } else { "disabled" },
            p.applied_agents.len(),
            p.actions.join(",")
        );
    }
    if policies.is_empty() {
        eprintln!("no policies defined");
    }
    Ok(())
}

/// Poll one host until Ctrl-C.
async fn follow_host(api: FleetApi, hostname: String) -> anyhow::Result<()> {
    let watch = PollWatch::host_metrics(
        api,
        hostname,
        HOST_METRICS_INTERVAL,
        |s| {
            let ts = s
                .captured_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| s.timestamp.to_string());
            println!(
                "{} cpu {:5.1}% ram {:5.1}% disk {:5.1}%  {}",
                s.hostname, s.cpu, s.ram, s.disk, ts
            );
        },
        |err| tracing::warn!(error = %err, "host poll failed"),
    );
    tokio::signal::ctrl_c().await?;
    watch.stop();
    Ok(())
}

fn prompt_yes_no(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_ok() {
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

fn prompt_string(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}

// --- Demo Mode ---

async fn run_demo_mode(parsed: &ParsedArgs) -> anyhow::Result<()> {
    let port = 50151;
    let base = format!("http://127.0.0.1:{port}");
    let child = spawn_demo_sim(port)?;
    let res = run_command(&base, None, parsed.command.clone()).await;
    drop(child);
    res
}

struct SimGuard(std::process::Child);
impl Drop for SimGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
    }
}

fn spawn_demo_sim(port: u16) -> anyhow::Result<SimGuard> {
    let candidate = find_sim_executable();
    let mut cmd = std::process::Command::new(candidate);
    cmd.arg("--port").arg(port.to_string());
    cmd.env("FLEETTOP_SIM_HOSTS", "4");
    cmd.env("FLEETTOP_SIM_LOCAL_HOST", "1");
    let child = SimGuard(cmd.spawn()?);
    // wait for the sim to bind before pointing the client at it
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    for _ in 0..50 {
        if std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(60));
    }
    Ok(child)
}

fn find_sim_executable() -> std::path::PathBuf {
    let self_exe = std::env::current_exe().ok();
    if let Some(exe) = self_exe {
        if let Some(parent) = exe.parent() {
            #[cfg(windows)]
            let name = "fleettop_sim.exe";
            #[cfg(not(windows))]
            let name = "fleettop_sim";
            let candidate = parent.join(name);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    // Fallback to relying on PATH
    std::path::PathBuf::from("fleettop_sim")
}
