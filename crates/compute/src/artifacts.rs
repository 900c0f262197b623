//! Names of the outputs a support computation produces, and log cleanup.

use std::sync::LazyLock;

use regex::Regex;

/// Tree annotated with classical (Felsenstein) bootstrap supports.
pub const FBP_TREE: &str = "fbp_tree";
/// Tree annotated with normalized transfer bootstrap supports.
pub const TBE_NORM_TREE: &str = "tbe_norm_tree";
/// Tree annotated with raw average transfer distances.
pub const TBE_RAW_TREE: &str = "tbe_raw_tree";
/// Per-taxon instability log of the transfer computation.
pub const TBE_LOGS: &str = "tbe_logs";

static IO_LINES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^.*(Input|Output|Boot|Date|Seed|CPUs|End).*:.*$[\r\n]+").expect("valid regex")
});
static TAXON_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Taxon : tIndex$").expect("valid regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^BOOSTER Support$[\r\n]+").expect("valid regex"));

/// Strip run metadata (paths, dates, seeds) from a transfer support log so
/// it can be shown to users.
pub fn clean_tbe_logs(log: &str) -> String {
    let cleaned = IO_LINES_RE.replace_all(log, "");
    let cleaned = TAXON_HEADER_RE.replace_all(&cleaned, "Taxon : Instability");
    TITLE_RE.replace_all(&cleaned, "").into_owned()
}
