//! Discovery collaborators, one per upstream publishing style.

mod github_releases;

pub use github_releases::GithubReleasesSource;
