//! Listing the ephemeral nodes under a path prefix.
//!
//! Matching is by string prefix, so `/testE` matches both `/testE` and
//! `/testE2`. The walk starts at the deepest directory that can contain a
//! match and only descends into children that either match or lie on the way
//! to the prefix.

use futures_util::future::join_all;
use tracing::debug;
use zk_protocol::ErrorCode;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::ops::validate_path;

pub(crate) async fn get_ephemerals(client: &Client, prefix: &str) -> Result<Vec<String>> {
	validate_path(prefix, false)?;
	if client.exists(prefix).await?.is_none() {
		return Err(Error::Operation(ErrorCode::NoNode));
	}

	// Arena of visited paths; the worklist holds indices into it.
	let mut paths: Vec<String> = vec![search_root(prefix).to_string()];
	let mut worklist: Vec<usize> = vec![0];
	let mut found = Vec::new();
	let mut visited = 0usize;

	while !worklist.is_empty() {
		let batch: Vec<usize> = std::mem::take(&mut worklist);
		visited += batch.len();
		let replies = join_all(batch.iter().map(|&index| client.children2(&paths[index]))).await;

		for (index, reply) in batch.into_iter().zip(replies) {
			let (children, stat) = match reply {
				Ok(listing) => listing,
				// Deleted since its parent was listed.
				Err(err) if err.is_no_node() => continue,
				Err(err) => return Err(err),
			};
			let path = &paths[index];
			if stat.is_ephemeral() && path.starts_with(prefix) {
				found.push(path.clone());
			}

			let parent = path.clone();
			for child in children {
				let child = join(&parent, &child);
				if leads_to_match(&child, prefix) {
					worklist.push(paths.len());
					paths.push(child);
				}
			}
		}
	}

	found.sort();
	debug!(target = "zk.session", prefix, visited, found = found.len(), "ephemeral scan complete");
	Ok(found)
}

/// Parent directory of `prefix`, or the root.
fn search_root(prefix: &str) -> &str {
	match prefix.rfind('/') {
		Some(0) | None => "/",
		Some(index) => &prefix[..index],
	}
}

fn join(parent: &str, child: &str) -> String {
	if parent == "/" { format!("/{child}") } else { format!("{parent}/{child}") }
}

/// Whether `path` matches `prefix` or is an ancestor of a possible match.
fn leads_to_match(path: &str, prefix: &str) -> bool {
	path.starts_with(prefix) || prefix.strip_prefix(path).is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn search_starts_at_the_prefix_parent() {
		assert_eq!(search_root("/"), "/");
		assert_eq!(search_root("/zktest"), "/");
		assert_eq!(search_root("/a/b/c"), "/a/b");
	}

	#[test]
	fn descends_only_toward_matches() {
		assert!(leads_to_match("/testE2", "/testE"));
		assert!(leads_to_match("/a", "/a/b/c"));
		assert!(leads_to_match("/a/b", "/a/b/c"));
		assert!(!leads_to_match("/ab", "/a/b"));
		assert!(!leads_to_match("/zktest", "/testE"));
		assert!(leads_to_match("/anything", "/"));
	}

	#[test]
	fn joins_children_onto_the_root() {
		assert_eq!(join("/", "a"), "/a");
		assert_eq!(join("/a", "b"), "/a/b");
	}
}
