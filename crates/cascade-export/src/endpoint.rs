//! Candidate collector endpoints and failover selection.
//!
//! Pure data and selection logic; no I/O and no locking. The shared
//! [`ExporterState`](crate::state::ExporterState) owns one of these behind
//! its lock.

use std::fmt;

use cascade_core::config::split_host_port;
use cascade_core::ConfigResult;

/// A collector address (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    address: String,
    host: String,
    local: bool,
}

impl Endpoint {
    fn parse(entry: &str, default_port: u16, local_host: &str) -> ConfigResult<Self> {
        let (host, port) = split_host_port(entry)?;
        let port = port.unwrap_or(default_port);
        Ok(Self {
            address: format!("{host}:{port}"),
            host: host.to_string(),
            local: same_host(host, local_host),
        })
    }

    /// `host:port` as dialed; IPv6 hosts keep their brackets.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Host part of the address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether this endpoint is co-located with this process.
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// gRPC target URI.
    pub fn uri(&self) -> String {
        format!("http://{}", self.address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Ordered candidate list with one endpoint distinguished as local.
///
/// The selection starts on the local endpoint. Failover walks forward
/// through the non-local candidates and never wraps; only
/// [`restore_local`](Self::restore_local) moves it back.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    candidates: Vec<Endpoint>,
    local: Endpoint,
    /// Candidate index in use after a failover; `None` while on local.
    selected: Option<usize>,
}

impl EndpointSet {
    /// Build from configured entries and this host's address.
    ///
    /// The local endpoint is the first entry whose host equals `local_host`,
    /// or `<local_host>:<default_port>` if none does.
    pub fn new<I, S>(entries: I, local_host: &str, default_port: u16) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates = entries
            .into_iter()
            .map(|e| Endpoint::parse(e.as_ref(), default_port, local_host))
            .collect::<ConfigResult<Vec<_>>>()?;

        let local = match candidates.iter().find(|e| e.local) {
            Some(found) => found.clone(),
            None if local_host.contains(':') && !local_host.starts_with('[') => {
                Endpoint::parse(&format!("[{local_host}]"), default_port, local_host)?
            }
            None => Endpoint::parse(local_host, default_port, local_host)?,
        };

        Ok(Self {
            candidates,
            local,
            selected: None,
        })
    }

    /// Parse a comma-separated endpoint list.
    pub fn from_list(list: &str, local_host: &str, default_port: u16) -> ConfigResult<Self> {
        Self::new(
            list.split(',').map(str::trim).filter(|e| !e.is_empty()),
            local_host,
            default_port,
        )
    }

    /// The endpoint co-located with this process.
    pub fn local(&self) -> &Endpoint {
        &self.local
    }

    /// Configured endpoints in order.
    pub fn candidates(&self) -> &[Endpoint] {
        &self.candidates
    }

    /// The endpoint exports should currently go to.
    pub fn current(&self) -> &Endpoint {
        match self.selected {
            Some(idx) => &self.candidates[idx],
            None => &self.local,
        }
    }

    /// Whether the selection is on the local endpoint.
    pub fn is_local(&self) -> bool {
        self.selected.is_none()
    }

    /// Index into [`candidates`](Self::candidates) after a failover.
    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    /// Select the next non-local candidate after the last failed one.
    ///
    /// Returns the new selection, or `None` if no candidate is left; the
    /// selection is then unchanged.
    pub fn advance_on_failure(&mut self) -> Option<&Endpoint> {
        let start = self.selected.map_or(0, |idx| idx + 1);
        let next = (start..self.candidates.len())
            .find(|&idx| self.candidates[idx].address != self.local.address)?;
        self.selected = Some(next);
        Some(&self.candidates[next])
    }

    /// Go back to the local endpoint. Returns `true` if the selection moved.
    pub fn restore_local(&mut self) -> bool {
        self.selected.take().is_some()
    }
}

fn same_host(a: &str, b: &str) -> bool {
    let strip = |h: &str| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
    strip(a) == strip(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(list: &str, host: &str) -> EndpointSet {
        EndpointSet::from_list(list, host, 4317).unwrap()
    }

    #[test]
    fn local_found_by_host() {
        let endpoints = set("10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");
        assert_eq!(endpoints.local().address(), "10.0.0.1:4317");
        assert!(endpoints.local().is_local());
        assert!(endpoints.is_local());
        assert_eq!(endpoints.current().address(), "10.0.0.1:4317");
    }

    #[test]
    fn host_match_is_exact_not_prefix() {
        let endpoints = set("10.0.0.12:4317", "10.0.0.1");
        assert_eq!(endpoints.local().address(), "10.0.0.1:4317");
        assert!(!endpoints.candidates()[0].is_local());
    }

    #[test]
    fn default_local_when_unlisted() {
        let endpoints = set("10.0.0.2:4317,10.0.0.3:4317", "10.0.0.9");
        assert_eq!(endpoints.current().address(), "10.0.0.9:4317");
        assert_eq!(endpoints.candidates().len(), 2);
    }

    #[test]
    fn missing_port_uses_default() {
        let endpoints = set("collector-a, collector-b:5317", "10.0.0.9");
        assert_eq!(endpoints.candidates()[0].address(), "collector-a:4317");
        assert_eq!(endpoints.candidates()[1].address(), "collector-b:5317");
        assert_eq!(endpoints.candidates()[0].uri(), "http://collector-a:4317");
    }

    #[test]
    fn invalid_entry_rejected() {
        assert!(EndpointSet::from_list("10.0.0.1:notaport", "10.0.0.1", 4317).is_err());
    }

    #[test]
    fn failover_then_failback_scenario() {
        let mut endpoints = set("10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");

        let next = endpoints.advance_on_failure().cloned();
        assert_eq!(next.unwrap().address(), "10.0.0.2:4317");
        assert_eq!(endpoints.current().address(), "10.0.0.2:4317");
        assert!(!endpoints.is_local());

        assert!(endpoints.restore_local());
        assert_eq!(endpoints.current().address(), "10.0.0.1:4317");
        // Already local.
        assert!(!endpoints.restore_local());
    }

    #[test]
    fn exhausted_candidates_leave_selection_unchanged() {
        let mut endpoints = set("10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");
        endpoints.advance_on_failure();

        assert!(endpoints.advance_on_failure().is_none());
        assert_eq!(endpoints.current().address(), "10.0.0.2:4317");
        assert!(endpoints.advance_on_failure().is_none());
        assert_eq!(endpoints.selected_index(), Some(1));
    }

    #[test]
    fn local_only_never_moves() {
        let mut endpoints = set("10.0.0.1:4317", "10.0.0.1");
        assert!(endpoints.advance_on_failure().is_none());
        assert!(endpoints.is_local());

        let mut endpoints = set("", "10.0.0.1");
        assert!(endpoints.advance_on_failure().is_none());
        assert_eq!(endpoints.current().address(), "10.0.0.1:4317");
    }

    #[test]
    fn scan_skips_local_in_the_middle() {
        let mut endpoints = set("10.0.0.2:4317,10.0.0.1:4317,10.0.0.3:4317", "10.0.0.1");
        assert_eq!(
            endpoints.advance_on_failure().unwrap().address(),
            "10.0.0.2:4317"
        );
        assert_eq!(
            endpoints.advance_on_failure().unwrap().address(),
            "10.0.0.3:4317"
        );
        assert!(endpoints.advance_on_failure().is_none());

        // After failback the scan starts over from the front.
        endpoints.restore_local();
        assert_eq!(
            endpoints.advance_on_failure().unwrap().address(),
            "10.0.0.2:4317"
        );
    }

    #[test]
    fn duplicate_of_local_is_skipped() {
        let mut endpoints = set("10.0.0.1:4317,10.0.0.1:4317,10.0.0.2:4317", "10.0.0.1");
        assert_eq!(
            endpoints.advance_on_failure().unwrap().address(),
            "10.0.0.2:4317"
        );
    }
}
