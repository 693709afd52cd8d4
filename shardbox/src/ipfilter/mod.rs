//! IP abuse filter.
//!
//! Three sets over IP addresses: an allowlist (exempt from penalties), a
//! banlist (absolute deadlines, `-1` permanent) and a flaglist (soft
//! penalty counters). Flags decay once per minute; reaching the flag
//! threshold escalates to a one-hour ban. Expired bans are swept once per
//! second. Lists persist to `config/ipbanmanager`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const AUTO_BAN: Duration = Duration::from_secs(3600);

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Persisted shape of the three lists.
#[derive(Serialize, Deserialize, Debug, Default)]
struct Persisted {
    #[serde(default)]
    allowed: Vec<String>,
    /// IP -> ban deadline in epoch ms, -1 permanent.
    #[serde(default)]
    banned: HashMap<String, i64>,
    #[serde(default)]
    flagged: HashMap<String, u32>,
}

/// Process-wide IP filter. Explicit lifecycle: [`IpFilter::load`],
/// background tasks via [`IpFilter::spawn_tasks`], [`IpFilter::persist`]
/// on shutdown.
pub struct IpFilter {
    allowed: RwLock<HashSet<IpAddr>>,
    banned: RwLock<HashMap<IpAddr, i64>>,
    flagged: RwLock<HashMap<IpAddr, u32>>,
    ban_after_flags: AtomicU32,
    path: PathBuf,
}

impl IpFilter {
    /// Load persisted lists from `config/ipbanmanager`, if present.
    pub fn load(config_dir: &Path, ban_after_flags: u32) -> Self {
        let path = config_dir.join("ipbanmanager");

        let persisted: Persisted = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(persisted) => persisted,
                Err(err) => {
                    warn!("ipbanmanager unreadable, starting clean: {}", err);
                    Persisted::default()
                }
            },
            Err(_) => Persisted::default(),
        };

        let parse = |s: &String| -> Option<IpAddr> {
            match s.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("ipbanmanager: \"{}\" is not an IP literal, dropped", s);
                    None
                }
            }
        };

        let filter = Self {
            allowed: RwLock::new(persisted.allowed.iter().filter_map(parse).collect()),
            banned: RwLock::new(
                persisted
                    .banned
                    .iter()
                    .filter_map(|(ip, deadline)| parse(ip).map(|ip| (ip, *deadline)))
                    .collect(),
            ),
            flagged: RwLock::new(
                persisted
                    .flagged
                    .iter()
                    .filter_map(|(ip, count)| parse(ip).map(|ip| (ip, *count)))
                    .collect(),
            ),
            ban_after_flags: AtomicU32::new(ban_after_flags),
            path,
        };

        let bans = filter.banned.read().len();
        if bans > 0 {
            info!("{} active ban(s) restored", bans);
        }

        filter
    }

    /// Write the lists back out.
    pub fn persist(&self) -> std::io::Result<()> {
        let persisted = Persisted {
            allowed: self.allowed.read().iter().map(|ip| ip.to_string()).collect(),
            banned: self
                .banned
                .read()
                .iter()
                .map(|(ip, deadline)| (ip.to_string(), *deadline))
                .collect(),
            flagged: self
                .flagged
                .read()
                .iter()
                .map(|(ip, count)| (ip.to_string(), *count))
                .collect(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&persisted)?)
    }

    /// Flags before auto-ban. Adjustable at runtime by admin actions.
    pub fn set_ban_after_flags(&self, value: u32) {
        self.ban_after_flags.store(value.max(1), Ordering::Relaxed);
    }

    pub fn ban_after_flags(&self) -> u32 {
        self.ban_after_flags.load(Ordering::Relaxed)
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.allowed.read().contains(&ip)
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        match self.banned.read().get(&ip) {
            Some(-1) => true,
            Some(deadline) => *deadline > epoch_ms(),
            None => false,
        }
    }

    pub fn is_flagged(&self, ip: IpAddr) -> bool {
        self.flagged.read().contains_key(&ip)
    }

    pub fn flag_count(&self, ip: IpAddr) -> u32 {
        self.flagged.read().get(&ip).copied().unwrap_or(0)
    }

    /// Add to the allowlist; clears any flags and bans on the spot.
    pub fn allow(&self, ip: IpAddr) {
        self.allowed.write().insert(ip);
        self.banned.write().remove(&ip);
        self.flagged.write().remove(&ip);
    }

    pub fn disallow(&self, ip: IpAddr) {
        self.allowed.write().remove(&ip);
    }

    /// Ban an IP; `None` is permanent.
    pub fn ban(&self, ip: IpAddr, duration: Option<Duration>) {
        let deadline = match duration {
            Some(duration) => epoch_ms() + duration.as_millis() as i64,
            None => -1,
        };
        self.banned.write().insert(ip, deadline);
        info!(%ip, "banned");
    }

    /// Push an existing ban deadline out. Permanent bans stay permanent;
    /// unknown IPs get a fresh ban.
    pub fn extend_ban(&self, ip: IpAddr, extra: Duration) {
        let mut banned = self.banned.write();
        match banned.get_mut(&ip) {
            Some(-1) => (),
            Some(deadline) => {
                *deadline = (*deadline).max(epoch_ms()) + extra.as_millis() as i64;
            }
            None => {
                banned.insert(ip, epoch_ms() + extra.as_millis() as i64);
            }
        }
    }

    pub fn unban(&self, ip: IpAddr) {
        self.banned.write().remove(&ip);
    }

    /// Raise the soft-penalty counter. No-op for allowlisted IPs. At the
    /// threshold the counter is consumed and the IP is banned for an hour.
    pub fn flag(&self, ip: IpAddr) {
        if self.is_allowed(ip) {
            return;
        }

        let banned = {
            let mut flagged = self.flagged.write();
            let count = flagged.entry(ip).or_insert(0);
            *count += 1;

            if *count >= self.ban_after_flags() {
                flagged.remove(&ip);
                true
            } else {
                false
            }
        };

        if banned {
            warn!(%ip, "flag threshold reached, auto-banning");
            self.ban(ip, Some(AUTO_BAN));
        }
    }

    /// One decay tick: every counter down by one, zeros removed.
    fn decay(&self) {
        let mut flagged = self.flagged.write();
        flagged.retain(|_, count| {
            *count = count.saturating_sub(1);
            *count > 0
        });
    }

    /// One cleaner tick: drop bans past their deadline.
    fn clean(&self) {
        let now = epoch_ms();
        let mut banned = self.banned.write();
        let before = banned.len();
        banned.retain(|_, deadline| *deadline == -1 || *deadline > now);

        let removed = before - banned.len();
        if removed > 0 {
            debug!("{} ban(s) expired", removed);
        }
    }

    /// Spawn the decay and cleaner tasks. Both stop at the next iteration
    /// boundary once `shutdown` fires.
    pub fn spawn_tasks(
        self: &std::sync::Arc<Self>,
        decay_interval: Duration,
        clean_interval: Duration,
        shutdown: CancellationToken,
    ) {
        let filter = self.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = token.cancelled() => break,
                    _ = sleep(decay_interval) => filter.decay(),
                }
            }
        });

        let filter = self.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(clean_interval) => filter.clean(),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> IpFilter {
        let dir = tempfile::tempdir().unwrap();
        IpFilter::load(dir.path(), 10)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_flag_escalates_to_ban() {
        let filter = filter();
        let target = ip("198.51.100.7");

        for _ in 0..9 {
            filter.flag(target);
            assert!(!filter.is_banned(target));
        }

        filter.flag(target);
        assert!(filter.is_banned(target));
        // Counter was consumed by the ban.
        assert!(!filter.is_flagged(target));
    }

    #[test]
    fn test_allowlisted_cannot_be_flagged() {
        let filter = filter();
        let target = ip("203.0.113.5");
        filter.allow(target);

        for _ in 0..100 {
            filter.flag(target);
        }

        assert!(!filter.is_flagged(target));
        assert!(!filter.is_banned(target));
    }

    #[test]
    fn test_ipv6_accepted() {
        let filter = filter();
        let target = ip("2001:db8::7");

        filter.ban(target, None);
        assert!(filter.is_banned(target));
        filter.unban(target);
        assert!(!filter.is_banned(target));
    }

    #[test]
    fn test_ban_expires_on_clean() {
        let filter = filter();
        let target = ip("192.0.2.1");

        filter.ban(target, Some(Duration::from_millis(0)));
        // Deadline is not in the future anymore.
        assert!(!filter.is_banned(target));
        filter.clean();
        assert!(!filter.banned.read().contains_key(&target));
    }

    #[test]
    fn test_permanent_ban_survives_clean() {
        let filter = filter();
        let target = ip("192.0.2.2");

        filter.ban(target, None);
        filter.clean();
        assert!(filter.is_banned(target));
    }

    #[test]
    fn test_extend_ban() {
        let filter = filter();
        let target = ip("192.0.2.3");

        filter.ban(target, Some(Duration::from_secs(60)));
        let before = *filter.banned.read().get(&target).unwrap();
        filter.extend_ban(target, Duration::from_secs(60));
        let after = *filter.banned.read().get(&target).unwrap();
        assert!(after > before);

        // Permanent stays permanent.
        filter.ban(target, None);
        filter.extend_ban(target, Duration::from_secs(60));
        assert_eq!(*filter.banned.read().get(&target).unwrap(), -1);
    }

    #[test]
    fn test_decay_removes_zeros() {
        let filter = filter();
        let target = ip("192.0.2.4");

        filter.flag(target);
        filter.flag(target);
        assert_eq!(filter.flag_count(target), 2);

        filter.decay();
        assert_eq!(filter.flag_count(target), 1);
        filter.decay();
        assert!(!filter.is_flagged(target));
    }

    #[test]
    fn test_persist_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let filter = IpFilter::load(dir.path(), 10);
            filter.allow(ip("10.0.0.1"));
            filter.ban(ip("192.0.2.9"), None);
            filter.flag(ip("192.0.2.10"));
            filter.persist().unwrap();
        }

        let filter = IpFilter::load(dir.path(), 10);
        assert!(filter.is_allowed(ip("10.0.0.1")));
        assert!(filter.is_banned(ip("192.0.2.9")));
        assert!(filter.is_flagged(ip("192.0.2.10")));
    }
}
