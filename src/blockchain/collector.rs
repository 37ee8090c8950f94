use crate::blockchain::client::ClientError;
use crate::config::Config;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Signature-history page retrieval, abstracted so the pagination guards are
/// testable without a live RPC endpoint.
#[allow(async_fn_in_trait)]
pub trait SignatureSource {
    async fn signature_page(
        &self,
        address: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, ClientError>;
}

#[derive(Debug, Default)]
pub struct CollectedSignatures {
    /// Unique signatures across all monitored addresses, in discovery order.
    pub signatures: Vec<String>,
    /// Monitored addresses whose history could not be read at all.
    pub failed_addresses: usize,
}

/// Page backward through each monitored address's signature history and
/// deduplicate into one global work set.
///
/// Stop conditions per address: empty page, short page, page-count ceiling.
/// The global signature ceiling halts collection early but keeps what was
/// already collected. A per-address fetch failure skips that address and
/// continues with the rest.
pub async fn collect_signatures<S: SignatureSource>(
    source: &S,
    config: &Config,
) -> CollectedSignatures {
    let mut seen: HashSet<String> = HashSet::new();
    let mut collected = CollectedSignatures::default();

    'addresses: for address in &config.monitored_addresses {
        info!("Fetching signatures for: {}", address);
        let mut before: Option<String> = None;
        let mut pages = 0usize;
        let mut found = 0usize;

        loop {
            if collected.signatures.len() >= config.max_total_signatures {
                warn!(
                    "Reached global signature ceiling ({}); halting collection early",
                    config.max_total_signatures
                );
                break 'addresses;
            }

            let page = match source
                .signature_page(address, before.as_deref(), config.signature_page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!("Error fetching signatures for {}: {}", address, e);
                    if pages == 0 {
                        collected.failed_addresses += 1;
                    }
                    continue 'addresses;
                }
            };

            if page.is_empty() {
                break;
            }

            // A remote that keeps returning the same trailing signature would
            // otherwise page forever.
            let last = page.last().cloned();
            if last == before {
                warn!(
                    "Repeated signature page cursor for {}; treating as end of history",
                    address
                );
                break;
            }

            let page_len = page.len();
            for signature in page {
                found += 1;
                if seen.insert(signature.clone()) {
                    collected.signatures.push(signature);
                    if collected.signatures.len() >= config.max_total_signatures {
                        break;
                    }
                }
            }

            pages += 1;
            if pages >= config.max_pages_per_address {
                debug!("Reached page ceiling for {}", address);
                break;
            }
            if page_len < config.signature_page_size {
                break;
            }
            before = last;
        }

        info!("  Found {} signatures for {}", found, address);
    }

    collected
}
