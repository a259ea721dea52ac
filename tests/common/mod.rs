// tests/common/mod.rs

//! Shared test utilities: a scripted shell transport that answers framed
//! session commands from canned response tables, plus host fixtures.

use async_trait::async_trait;
use cloudflock::shell::{HostEndpoint, ShellStream, ShellTransport, PROMPT_SENTINEL};
use cloudflock::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Response rules for one scripted host: `(pattern, output)` pairs matched
/// by substring against the framed command, first match wins. A `HANG`
/// output makes the command never complete, for deadline and cancellation
/// tests.
pub const HANG: &str = "\0hang";

/// An `EOF` output closes the stream mid-command, simulating transport
/// loss.
pub const EOF: &str = "\0eof";

#[derive(Debug)]
struct Rule {
    pattern: String,
    output: String,
    once: bool,
}

#[derive(Clone, Default, Debug)]
pub struct ScriptedHost {
    rules: Arc<Mutex<Vec<Rule>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule; patterns are matched in insertion order.
    pub fn respond(&self, pattern: &str, output: &str) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            output: output.to_string(),
            once: false,
        });
        self
    }

    /// Append a rule consumed by its first match.
    pub fn respond_once(&self, pattern: &str, output: &str) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            output: output.to_string(),
            once: true,
        });
        self
    }

    /// Every framed command this host has received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// True when some received command contains the needle.
    pub fn saw(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    /// How many received commands contain the needle.
    pub fn count(&self, needle: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    fn lookup(&self, command: &str) -> String {
        self.commands.lock().unwrap().push(command.to_string());
        let mut rules = self.rules.lock().unwrap();
        // A leading '^' anchors the pattern to the start of the command;
        // anything else matches by substring.
        let matches = |r: &Rule| match r.pattern.strip_prefix('^') {
            Some(prefix) => command.starts_with(prefix),
            None => command.contains(r.pattern.as_str()),
        };
        let Some(idx) = rules.iter().position(matches) else {
            return String::new();
        };
        let output = rules[idx].output.clone();
        if rules[idx].once {
            rules.remove(idx);
        }
        output
    }
}

/// Transport serving scripted hosts by hostname
#[derive(Default)]
pub struct ScriptedTransport {
    hosts: Mutex<HashMap<String, ScriptedHost>>,
    /// Login attempts to fail before succeeding, per hostname
    auth_failures: Mutex<HashMap<String, u32>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, hostname: &str, host: ScriptedHost) {
        self.hosts
            .lock()
            .unwrap()
            .insert(hostname.to_string(), host);
    }

    /// Make the next `count` connects to `hostname` fail authentication.
    pub fn fail_logins(&self, hostname: &str, count: u32) {
        self.auth_failures
            .lock()
            .unwrap()
            .insert(hostname.to_string(), count);
    }
}

#[async_trait]
impl ShellTransport for ScriptedTransport {
    async fn connect(&self, endpoint: &HostEndpoint) -> Result<Box<dyn ShellStream>> {
        {
            let mut failures = self.auth_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&endpoint.hostname) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::SessionLost {
                        host: endpoint.hostname.clone(),
                        reason: "scripted auth failure".to_string(),
                    });
                }
            }
        }
        let host = self
            .hosts
            .lock()
            .unwrap()
            .get(&endpoint.hostname)
            .cloned()
            .ok_or_else(|| Error::InvalidHostname(endpoint.hostname.clone()))?;
        Ok(Box::new(ScriptedStream::new(host)))
    }
}

#[derive(Debug)]
enum StreamMode {
    Shell,
    AwaitingPassword,
}

#[derive(Debug)]
pub struct ScriptedStream {
    host: ScriptedHost,
    mode: StreamMode,
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
    frame_re: Regex,
}

impl ScriptedStream {
    fn new(host: ScriptedHost) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            host,
            mode: StreamMode::Shell,
            tx: Some(tx),
            rx,
            frame_re: Regex::new(r"^echo (fk[A-Za-z0-9_-]+); \{ (.*) ; \} 2>&1; echo ")
                .expect("static regex"),
        }
    }

    fn enqueue(&self, data: String) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(data);
        }
    }

    fn handle_line(&mut self, line: &str) {
        if matches!(self.mode, StreamMode::AwaitingPassword) {
            // The password line itself; drop it and go back to shell mode.
            self.mode = StreamMode::Shell;
            return;
        }
        if line.contains("export PS1") {
            self.enqueue(format!("{}\n", PROMPT_SENTINEL));
            return;
        }
        if line == "su -" || line == "sudo su -" {
            self.mode = StreamMode::AwaitingPassword;
            self.enqueue("Password: ".to_string());
            return;
        }
        if line == "\x03" {
            self.enqueue(format!("\n{}\n", PROMPT_SENTINEL));
            return;
        }
        if let Some(caps) = self.frame_re.captures(line) {
            let tag = caps[1].to_string();
            let command = caps[2].to_string();
            let output = self.host.lookup(&command);
            if output == HANG {
                return;
            }
            if output == EOF {
                self.tx.take();
                return;
            }
            // "prefix\0hang" emits the opening tag and some output, then
            // stalls: a long-running command mid-stream.
            if let Some(prefix) = output.strip_suffix(HANG) {
                self.enqueue(format!("{tag}\n{prefix}\n"));
                return;
            }
            self.enqueue(format!(
                "{tag}\n{output}\n{tag}\n{}\n",
                PROMPT_SENTINEL
            ));
        }
    }
}

#[async_trait]
impl ShellStream for ScriptedStream {
    async fn send(&mut self, data: &str) -> Result<()> {
        if data == "\n" {
            // Keep-alive tick
            self.enqueue(format!("{}\n", PROMPT_SENTINEL));
            return Ok(());
        }
        let lines: Vec<String> = data
            .lines()
            .map(|l| l.to_string())
            .filter(|l| !l.is_empty() || matches!(self.mode, StreamMode::AwaitingPassword))
            .collect();
        for line in lines {
            self.handle_line(&line);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.tx.take();
    }
}

/// A scripted host answering every probe the profiler runs, shaped like a
/// small CentOS 6 web server.
pub fn centos_host() -> ScriptedHost {
    let host = ScriptedHost::new();
    host.respond("cat /etc/system-release-cpe", "cpe:/o:centos:centos:6.3")
        .respond("hostname", "web01.example.com")
        .respond("uname -r", "2.6.32-279.el6.x86_64")
        .respond("uname -m", "x86_64")
        .respond(
            "uptime",
            " 10:02:11 up 3 days, 20 min,  1 user,  load average: 0.31, 0.40, 0.52",
        )
        .respond(
            "cat /proc/cpuinfo",
            "processor\t: 0\nmodel name\t: Intel(R) Xeon(R) CPU E5-2670\ncpu MHz\t\t: 2600.042\nprocessor\t: 1\nmodel name\t: Intel(R) Xeon(R) CPU E5-2670\ncpu MHz\t\t: 2600.042",
        )
        .respond(
            "free -m",
            "             total       used       free     shared    buffers     cached\nMem:          3953       3058        894          0        201       1582\n-/+ buffers/cache:       1274       2678\nSwap:         4095          0       4095",
        )
        .respond("which sar", "")
        .respond("iostat", "avg-cpu:  %user   %nice %system %iowait  %steal   %idle\n           2.10    0.00    0.90    1.40    0.00   95.60")
        .respond(
            "^df",
            "Filesystem     1K-blocks     Used Available Use% Mounted on\n/dev/xvda1      41284928 21550080  17637632  55% /\ntmpfs            1977068        0   1977068   0% /dev/shm",
        )
        .respond(
            "ifconfig",
            "eth0      Link encap:Ethernet\n          inet addr:192.0.2.7  Bcast:192.0.2.255  Mask:255.255.255.0\neth1      Link encap:Ethernet\n          inet addr:10.0.0.12  Bcast:10.0.0.255  Mask:255.255.255.0\nlo        Link encap:Local Loopback\n          inet addr:127.0.0.1  Mask:255.0.0.0",
        )
        .respond("ldd --version", "ldd (GNU libc) 2.12")
        .respond("openssl version", "OpenSSL 1.0.0-fips 29 Mar 2010")
        .respond(
            "netstat",
            "Active Internet connections (only servers)\nProto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name\ntcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      812/sshd\ntcp        0      0 0.0.0.0:80              0.0.0.0:*               LISTEN      1200/httpd",
        )
        .respond("ps aux", "root       812  0.0  0.1  sshd\napache    1200  0.2  1.0  httpd");
    host
}

/// A scripted destination host: freshly provisioned CentOS with its target
/// root on /dev/xvdb1, answering both the engine's preparation commands
/// and a full profiler pass.
pub fn dest_host() -> ScriptedHost {
    let host = ScriptedHost::new();
    host.respond(
        "ssh-keygen -l -f /etc/ssh/ssh_host_rsa_key.pub",
        "2048 SHA256:dEsTkEyFiNgErPrInT /etc/ssh/ssh_host_rsa_key.pub (RSA)",
    )
    .respond("which rsync", "/usr/bin/rsync")
    .respond("pre.sh", "FLOCK_PHASE_OK")
    .respond("chroot.sh", "FLOCK_PHASE_OK")
    .respond("post.sh", "FLOCK_PHASE_OK")
    .respond("cat /etc/system-release-cpe", "cpe:/o:centos:centos:6.3")
    .respond("hostname", "dest01.example.com")
    .respond("uname -r", "2.6.32-279.el6.x86_64")
    .respond("uname -m", "x86_64")
    .respond(
        "uptime",
        " 10:05:00 up 10 min,  1 user,  load average: 0.05, 0.10, 0.08",
    )
    .respond(
        "cat /proc/cpuinfo",
        "processor\t: 0\nmodel name\t: Intel(R) Xeon(R) CPU E5-2670\ncpu MHz\t\t: 2600.042",
    )
    .respond(
        "free -m",
        "             total       used       free     shared    buffers     cached\nMem:          2048        512       1536          0         64        128\nSwap:         4095          0       4095",
    )
    .respond("which sar", "")
    .respond(
        "iostat",
        "avg-cpu:  %user   %nice %system %iowait  %steal   %idle\n           0.50    0.00    0.20    0.30    0.00   99.00",
    )
    .respond(
        "^df",
        "Filesystem     1K-blocks     Used Available Use% Mounted on\n/dev/xvda1      41284928  4128492  35094064  10% /\n/dev/xvdb1      82569856  1651397  78853256   2% /mnt/migration_target",
    )
    .respond(
        "ifconfig",
        "eth0      Link encap:Ethernet\n          inet addr:192.0.2.40  Bcast:192.0.2.255  Mask:255.255.255.0\neth1      Link encap:Ethernet\n          inet addr:10.0.0.5  Bcast:10.0.0.255  Mask:255.255.255.0\nlo        Link encap:Local Loopback\n          inet addr:127.0.0.1  Mask:255.0.0.0",
    )
    .respond("ldd --version", "ldd (GNU libc) 2.12")
    .respond("openssl version", "OpenSSL 1.0.0-fips 29 Mar 2010")
    .respond(
        "netstat",
        "Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program name\ntcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      601/sshd",
    )
    .respond("ps aux", "root       601  0.0  0.1  sshd");
    host
}

/// Extend the standard source host with the engine-side responses: the
/// transfer keypair, rsync, and host key scans of the destination's
/// addresses (only 10.0.0.5 presents the destination's own key).
pub fn arm_source_for_migration(host: &ScriptedHost) {
    host.respond(
        "cat /root/.cloudflock/migration_id_rsa.pub",
        "ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAACAQC7examplekey migration",
    )
    .respond("which rsync", "/usr/bin/rsync")
    .respond(
        "ssh-keyscan -t rsa -T 5 10.0.0.5",
        "2048 SHA256:dEsTkEyFiNgErPrInT 10.0.0.5 (RSA)",
    )
    .respond(
        "ssh-keyscan -t rsa -T 5 192.0.2.40",
        "2048 SHA256:sOmEoThErHoStKeY 192.0.2.40 (RSA)",
    )
    .respond("rsync -azP", "sending incremental file list\nFLOCK_RSYNC_OK");
}

/// A root endpoint against a scripted hostname
pub fn root_endpoint(hostname: &str) -> HostEndpoint {
    HostEndpoint::root_with_password(hostname, "scripted")
}
