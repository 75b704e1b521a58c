//! Map free-text category tags to an audience.
//!
//! Precedence: an explicit `university` tag, then an explicit `cohort` tag,
//! then the first tag (in listed order) naming an active group. Anything
//! else falls back to university. Resolution never fails.

use tracing::warn;

use crate::{
    directory::GroupDirectory,
    text::slugify,
    types::{Audience, Group},
};

const UNIVERSITY_TAG: &str = "university";
const COHORT_TAG: &str = "cohort";

/// Resolve against an already-loaded list of the guild's active groups.
pub fn resolve_scope_in(tags: &[String], active_groups: &[Group]) -> Audience {
    let slugs = match explicit_audience(tags) {
        Ok(audience) => return audience,
        Err(slugs) => slugs,
    };
    slugs
        .iter()
        .find_map(|slug| active_groups.iter().find(|g| g.active && g.name == *slug))
        .map_or(Audience::University, |group| Audience::Group(group.id))
}

/// Resolve by asking the directory for each candidate slug in turn.
///
/// A lookup error is logged and treated as "no match" for that tag.
pub async fn resolve_scope(
    tags: &[String],
    guild_id: &str,
    directory: &dyn GroupDirectory,
) -> Audience {
    let slugs = match explicit_audience(tags) {
        Ok(audience) => return audience,
        Err(slugs) => slugs,
    };
    for slug in &slugs {
        match directory.group_by_slug(guild_id, slug).await {
            Ok(Some(group)) if group.active => return Audience::Group(group.id),
            Ok(_) => {},
            Err(e) => warn!(guild_id, slug = %slug, error = %e, "group lookup failed"),
        }
    }
    Audience::University
}

/// `Ok` when the tags settle the audience without a group lookup, otherwise
/// the non-empty slugs left to try against groups.
fn explicit_audience(tags: &[String]) -> Result<Audience, Vec<String>> {
    let slugs: Vec<String> = tags
        .iter()
        .map(|tag| slugify(tag))
        .filter(|slug| !slug.is_empty())
        .collect();

    if slugs.is_empty() {
        return Ok(Audience::University);
    }
    if slugs.iter().any(|s| s == UNIVERSITY_TAG) {
        return Ok(Audience::University);
    }
    if slugs.iter().any(|s| s == COHORT_TAG) {
        return Ok(Audience::Cohort);
    }
    Err(slugs)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn group(id: i64, name: &str) -> Group {
        Group {
            id,
            guild_id: "g1".into(),
            name: name.into(),
            label: name.to_uppercase(),
            active: true,
        }
    }

    fn groups() -> Vec<Group> {
        let mut retired = group(9, "old-lab");
        retired.active = false;
        vec![group(1, "cbi-a"), group(2, "anatomy-3"), retired]
    }

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|t| (*t).to_string()).collect()
    }

    #[rstest]
    #[case::empty(&[], Audience::University)]
    #[case::university_beats_cohort(&["cohort", "university"], Audience::University)]
    #[case::university_beats_group(&["cbi-a", "University"], Audience::University)]
    #[case::cohort_beats_group(&["cbi-a", "Cohort"], Audience::Cohort)]
    #[case::first_matching_group(&["random-tag", "cbi-a"], Audience::Group(1))]
    #[case::group_order_matters(&["Anatomy 3", "CBI A"], Audience::Group(2))]
    #[case::unknown_group(&["nonexistent-group"], Audience::University)]
    #[case::inactive_group(&["old-lab"], Audience::University)]
    #[case::blank_tags(&["  ", "!!"], Audience::University)]
    fn precedence(#[case] raw: &[&str], #[case] expected: Audience) {
        assert_eq!(resolve_scope_in(&tags(raw), &groups()), expected);
    }

    #[tokio::test]
    async fn directory_lookup_matches_batch_resolution() {
        let store = crate::store_sqlite::SqliteStore::new("sqlite::memory:")
            .await
            .unwrap();
        let cbi = store.create_group("g1", "cbi-a", "CBI A").await.unwrap();
        let retired = store.create_group("g1", "old-lab", "Old lab").await.unwrap();
        store.set_group_active(retired.id, false).await.unwrap();

        let cases = [
            (tags(&["random-tag", "cbi-a"]), Audience::Group(cbi.id)),
            (tags(&["cohort", "university"]), Audience::University),
            (tags(&["old-lab"]), Audience::University),
            (tags(&["nonexistent-group"]), Audience::University),
        ];
        for (input, expected) in cases {
            assert_eq!(resolve_scope(&input, "g1", &store).await, expected);
            assert_eq!(resolve_scope(&input, "other-guild", &store).await.scope(), match expected {
                Audience::Group(_) => crate::types::Scope::University,
                other => other.scope(),
            });
        }
    }
}
