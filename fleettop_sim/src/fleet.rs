//! The synthetic fleet: seeded hosts with drifting metrics, plus an optional
//! mirror of the machine the sim runs on.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use sysinfo::{Disks, System};

use fleettop::types::{Agent, AgentStatus, ControlAction, MetricSample, Policy};

const ENVS: [&str; 2] = ["prod", "staging"];
const REGIONS: [&str; 3] = ["us-east-1", "eu-west-1", "ap-south-1"];
const PREFIXES: [&str; 4] = ["edge", "core", "web", "db"];
const AGENT_VERSION: &str = "1.4.2";

// A restarted host stays degraded for this many drift steps.
const RESTART_RECOVERY_STEPS: u32 = 3;

pub struct SimHost {
    pub hostname: String,
    pub agent_id: String,
    pub env: String,
    pub region: String,
    pub ip_address: String,
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub status: AgentStatus,
    pub blocked: bool,
    pub last_seen: i64,
    // drift steps left until a restarted host reports online again
    recovery: u32,
    // mirror the real system instead of drifting
    local: bool,
}

impl SimHost {
    fn seeded(i: usize, rng: &mut StdRng) -> SimHost {
        let prefix = PREFIXES[i % PREFIXES.len()];
        SimHost {
            hostname: format!("{}-{:02}", prefix, i / PREFIXES.len() + 1),
            agent_id: format!("agent-{:03}", i + 1),
            env: ENVS[i % ENVS.len()].to_string(),
            region: REGIONS[i % REGIONS.len()].to_string(),
            ip_address: format!("10.40.0.{}", 10 + i),
            cpu: rng.gen_range(5.0..60.0),
            ram: rng.gen_range(20.0..70.0),
            disk: rng.gen_range(30.0..80.0),
            status: AgentStatus::Online,
            blocked: false,
            last_seen: Utc::now().timestamp(),
            recovery: 0,
            local: false,
        }
    }

    /// Eligible for the live feed: not blocked, not shut down.
    pub fn active(&self) -> bool {
        !self.blocked && self.status != AgentStatus::Offline
    }

    pub fn sample(&self) -> MetricSample {
        MetricSample {
            hostname: self.hostname.clone(),
            agent_id: self.agent_id.clone(),
            cpu: self.cpu,
            ram: self.ram,
            disk: self.disk,
            timestamp: self.last_seen,
            ip_address: Some(self.ip_address.clone()),
        }
    }

    pub fn agent(&self) -> Agent {
        Agent {
            id: self.agent_id.clone(),
            host: self.hostname.clone(),
            env: self.env.clone(),
            region: self.region.clone(),
            // blocked hosts read as offline to the console
            status: if self.blocked {
                AgentStatus::Offline
            } else {
                self.status
            },
            version: AGENT_VERSION.to_string(),
            cpu: self.cpu,
            ram: self.ram,
            disk: self.disk,
            ip_address: self.ip_address.clone(),
            last_seen: Some(self.last_seen),
            blocked: Some(self.blocked),
        }
    }
}

pub struct SimFleet {
    hosts: Vec<SimHost>,
    policies: Vec<Policy>,
    rng: StdRng,
    sys: Option<System>,
}

impl SimFleet {
    /// Seed `n` synthetic hosts; optionally append one mirroring the machine
    /// the sim runs on.
    pub fn seed(n: usize, with_local: bool) -> SimFleet {
        let mut rng = StdRng::from_entropy();
        let mut hosts: Vec<SimHost> = (0..n).map(|i| SimHost::seeded(i, &mut rng)).collect();
        let mut sys = None;
        if with_local {
            let mut local_sys = System::new();
            local_sys.refresh_cpu_usage();
            local_sys.refresh_memory();
            let mut host = SimHost::seeded(hosts.len(), &mut rng);
            host.hostname = System::host_name().unwrap_or_else(|| "localhost".into());
            host.ip_address = "127.0.0.1".into();
            host.local = true;
            hosts.push(host);
            sys = Some(local_sys);
        }
        SimFleet {
            hosts,
            policies: seed_policies(),
            rng,
            sys,
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// One drift step for every host that is up. Synthetic hosts take a
    /// bounded random walk; local hosts re-read the real system. Restarted
    /// hosts count their recovery window down here.
    pub fn advance(&mut self) {
        let now = Utc::now().timestamp();
        for host in &mut self.hosts {
            if host.status == AgentStatus::Offline {
                // no heartbeat while down
                continue;
            }
            if host.recovery > 0 {
                host.recovery -= 1;
                if host.recovery == 0 {
                    host.status = AgentStatus::Online;
                }
            }
            if host.local {
                if let Some(sys) = self.sys.as_mut() {
                    sys.refresh_cpu_usage();
                    sys.refresh_memory();
                    host.cpu = sys.global_cpu_usage() as f64;
                    host.ram = mem_pct(sys);
                    host.disk = local_disk_pct().unwrap_or(host.disk);
                }
            } else {
                host.cpu = drift(host.cpu, &mut self.rng, 4.0);
                host.ram = drift(host.ram, &mut self.rng, 2.0);
                host.disk = drift(host.disk, &mut self.rng, 0.5);
            }
            host.last_seen = now;
        }
    }

    /// Round-robin over feed-eligible hosts, starting after `cursor` (which
    /// may wrap). Returns the sample and the host's index for the next call,
    /// or None when nothing is eligible.
    pub fn next_active(&self, cursor: usize) -> Option<(MetricSample, usize)> {
        let len = self.hosts.len();
        if len == 0 {
            return None;
        }
        for off in 1..=len {
            let idx = cursor.wrapping_add(off) % len;
            let host = &self.hosts[idx];
            if host.active() {
                return Some((host.sample(), idx));
            }
        }
        None
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.hosts.iter().map(SimHost::agent).collect()
    }

    pub fn policies(&self) -> Vec<Policy> {
        self.policies.clone()
    }

    pub fn host_sample(&self, hostname: &str) -> Option<MetricSample> {
        self.hosts
            .iter()
            .find(|h| h.hostname == hostname)
            .map(SimHost::sample)
    }

    pub fn control(&mut self, agent_id: &str, action: ControlAction) -> bool {
        let Some(host) = self.hosts.iter_mut().find(|h| h.agent_id == agent_id) else {
            return false;
        };
        match action {
            ControlAction::Start => {
                host.status = AgentStatus::Online;
                host.recovery = 0;
            }
            ControlAction::Restart => {
                host.status = AgentStatus::Degraded;
                host.recovery = RESTART_RECOVERY_STEPS;
            }
            ControlAction::Shutdown => {
                host.status = AgentStatus::Offline;
                host.recovery = 0;
            }
        }
        true
    }

    pub fn set_blocked(&mut self, agent_id: &str, blocked: bool) -> bool {
        let Some(host) = self.hosts.iter_mut().find(|h| h.agent_id == agent_id) else {
            return false;
        };
        host.blocked = blocked;
        true
    }

    pub fn apply_policy(&mut self, agent_id: &str, policy_id: &str) -> bool {
        if !self.hosts.iter().any(|h| h.agent_id == agent_id) {
            return false;
        }
        let Some(policy) = self.policies.iter_mut().find(|p| p.policy_id == policy_id) else {
            return false;
        };
        let id = agent_id.to_string();
        if !policy.applied_agents.contains(&id) {
            policy.applied_agents.push(id);
        }
        policy.updated_at = Some(Utc::now().timestamp());
        true
    }
}

fn drift(v: f64, rng: &mut StdRng, step: f64) -> f64 {
    (v + rng.gen_range(-step..=step)).clamp(2.0, 98.0)
}

fn mem_pct(sys: &System) -> f64 {
    let total = sys.total_memory();
    if total == 0 {
        return 0.0;
    }
    sys.used_memory() as f64 / total as f64 * 100.0
}

fn local_disk_pct() -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    let d = disks.list().iter().find(|d| d.total_space() > 0)?;
    let used = d.total_space().saturating_sub(d.available_space());
    Some(used as f64 / d.total_space() as f64 * 100.0)
}

fn seed_policies() -> Vec<Policy> {
    let created = Utc::now().timestamp();
    vec![
        Policy {
            policy_id: "pol-cpu-guard".into(),
            name: "CPU guard".into(),
            description: "Restart workloads when CPU stays hot".into(),
            thresholds: pairs(&[("cpu", "90")]),
            actions: vec!["notify".into(), "restart".into()],
            enabled: true,
            applied_agents: vec![],
            created_at: Some(created),
            updated_at: None,
        },
        Policy {
            policy_id: "pol-disk-watch".into(),
            name: "Disk watch".into(),
            description: "Page the on-call before disks fill".into(),
            thresholds: pairs(&[("disk", "85")]),
            actions: vec!["notify".into()],
            enabled: true,
            applied_agents: vec![],
            created_at: Some(created),
            updated_at: None,
        },
        Policy {
            policy_id: "pol-ram-ceiling".into(),
            name: "RAM ceiling".into(),
            description: "Shed load when memory pressure climbs".into(),
            thresholds: pairs(&[("ram", "92")]),
            actions: vec!["notify".into(), "shutdown".into()],
            enabled: false,
            applied_agents: vec![],
            created_at: Some(created),
            updated_at: None,
        },
    ]
}

fn pairs(kv: &[(&str, &str)]) -> BTreeMap<String, String> {
    kv.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
