//! Suggestions for binding errors ("did you mean 'Person'?").

/// Edit distance between two strings, compared case-insensitively.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().flat_map(char::to_lowercase).collect();
    let b: Vec<char> = b.chars().flat_map(char::to_lowercase).collect();

    // One row of the DP table; `diag` carries the previous row's left cell.
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = diag + usize::from(ca != cb);
            diag = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(diag + 1);
        }
    }
    row[b.len()]
}

/// Finds the candidate closest to `query`, if any is close enough to be a
/// plausible typo. Short names tolerate fewer edits than long ones.
///
/// ```
/// use trellis_common::utils::strings::find_similar;
///
/// let tables = ["Person", "City"];
/// assert_eq!(find_similar("Peron", &tables), Some("Person"));
/// assert_eq!(find_similar("Galaxy", &tables), None);
/// ```
pub fn find_similar<'a, S: AsRef<str>>(query: &str, candidates: &'a [S]) -> Option<&'a str> {
    let budget = match query.chars().count() {
        0..=3 => 1,
        4..=5 => 2,
        _ => 3,
    };
    candidates
        .iter()
        .map(|c| (c.as_ref(), edit_distance(query, c.as_ref())))
        .filter(|&(_, distance)| distance <= budget)
        .min_by_key(|&(_, distance)| distance)
        .map(|(candidate, _)| candidate)
}

/// Builds the hint attached to a binding error, or `None` without a match.
#[must_use]
pub fn suggestion_hint<S: AsRef<str>>(query: &str, candidates: &[S]) -> Option<String> {
    find_similar(query, candidates).map(|s| format!("did you mean '{s}'?"))
}
