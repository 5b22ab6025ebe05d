//! Server catalog.
//!
//! The list of known BDIX servers, either built in or loaded from a JSON
//! file, and the helpers that turn it into probe targets or suggestions.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::Target;

/// Number of suggestions returned for an empty query.
const DEFAULT_SUGGESTIONS: usize = 5;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A logical server reachable through one or more URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub urls: Vec<String>,
}

impl Server {
    fn new(name: &str, category: &str, description: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            urls: vec![url.to_string()],
        }
    }
}

/// The built-in catalog.
pub fn default_catalog() -> Vec<Server> {
    vec![
        Server::new("SAMONLINE FTP", "FTP Servers", "Popular movie and software FTP server", "http://172.16.50.4"),
        Server::new("DISCOVERY FTP", "FTP Servers", "General content FTP server", "discoveryftp.net"),
        Server::new("WOW MOVIE ZONE FTP", "FTP Servers", "", "http://172.27.27.84"),
        Server::new("BUSINESS NETWORK FTP", "FTP Servers", "", "http://103.58.73.9"),
        Server::new("ICC COMMUNICATION FTP", "FTP Servers", "", "http://10.16.100.244"),
        Server::new("EBOX", "FTP Servers", "", "fs.ebox.live"),
        Server::new("CIRCLE NET", "FTP Servers", "", "http://15.1.1.1"),
        Server::new("MAZEDA NETWORK", "FTP Servers", "", "http://172.22.22.101"),
        Server::new("NATURALBD", "Media Servers", "NaturalBD entertainment content", "www.naturalbd.com"),
        Server::new("DHAKAMOVIE", "Media Servers", "", "dhakamovie.com"),
        Server::new("CTGMOVIES", "Media Servers", "Chittagong-based movie server", "ctgmovies.com"),
        Server::new("MOVIEHAAT", "Media Servers", "", "moviehaat.net"),
        Server::new("BOSSBD", "Media Servers", "High-speed movie content server", "www.bossbd.net"),
        Server::new("POLLYFLIX", "Media Servers", "", "pollyflix.com"),
        Server::new("IHUB", "Media Servers", "", "ihub.live"),
        Server::new("ALPHAMEDIAZONE", "Software Repositories", "Software and application repository", "www.alphabroadway.com"),
        Server::new("BDPLEX", "Software Repositories", "", "bdplex.net"),
        Server::new("FREEDOWNLOADBD", "Software Repositories", "", "www.freedownloadbd.com"),
        Server::new("LINK3 INTERNET", "ISP Specific", "", "www.cinehub24.com"),
        Server::new("DHAKA FIBER NET", "ISP Specific", "Dhaka Fiber Network content server", "media.dfnbd.net"),
        Server::new("GPISP", "ISP Specific", "", "gpisp.net"),
        Server::new("UNIQUE NET", "Miscellaneous", "", "http://103.91.144.230"),
        Server::new("CITY CLOUD BD", "Miscellaneous", "", "http://103.102.253.250"),
        Server::new("TIMEPASSBD", "Miscellaneous", "", "www.timepassbd.live"),
    ]
}

/// Load a catalog from a JSON array of servers.
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<Vec<Server>, CatalogError> {
    let data = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

/// One target per URL, in catalog order.
pub fn flatten(servers: &[Server]) -> Vec<Target> {
    servers
        .iter()
        .flat_map(|server| {
            server
                .urls
                .iter()
                .enumerate()
                .map(|(index, url)| Target::with_index(server.name.clone(), index, url.clone()))
        })
        .collect()
}

/// Servers whose name or category contains `query`, ignoring case.
///
/// An empty query returns the first few servers.
pub fn suggest<'a>(servers: &'a [Server], query: &str) -> Vec<&'a Server> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return servers.iter().take(DEFAULT_SUGGESTIONS).collect();
    }

    servers
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&query) || s.category.to_lowercase().contains(&query))
        .collect()
}
