use crate::observation::{AttributeValue, Fingerprint, Observation, INPUT_REFLECTIONS};

fn is_unmeasured_reflection(key: &str, value: &AttributeValue) -> bool {
    key == INPUT_REFLECTIONS && *value == AttributeValue::Incalculable
}

pub fn identical(a: &Observation, b: &Observation) -> bool {
    a.fingerprint() == b.fingerprint()
}

// reflection count is skipped when either side was sent without an anchor
pub fn identical_where_measured(a: &Observation, b: &Observation) -> bool {
    let mut a_print = a.fingerprint();
    let mut b_print = b.fingerprint();
    let unmeasured = |print: &Fingerprint| {
        print.get(INPUT_REFLECTIONS) == Some(&AttributeValue::Incalculable)
    };
    if unmeasured(&a_print) || unmeasured(&b_print) {
        a_print.remove(INPUT_REFLECTIONS);
        b_print.remove(INPUT_REFLECTIONS);
    }
    a_print == b_print
}

pub fn similar(group: &Observation, single: &Observation) -> bool {
    let single_print = single.fingerprint();
    for (key, value) in group.fingerprint().iter() {
        match single_print.get(key) {
            Some(other) if other == value => {}
            None if is_unmeasured_reflection(key, value) => {}
            _ => return false,
        }
    }
    true
}

/// `false` once the two classes are provably different. An attribute invariant
/// in only one group is checked against the other class's latest sample.
pub fn similar_ish(
    no_break_group: &Observation,
    break_group: &Observation,
    no_break_sample: &Observation,
    break_sample: &Observation,
) -> bool {
    let no_break_print = no_break_group.fingerprint();
    let break_print = break_group.fingerprint();

    if !one_side_matches(&no_break_print, &break_print, &break_sample.fingerprint()) {
        return false;
    }
    one_side_matches(&break_print, &no_break_print, &no_break_sample.fingerprint())
}

fn one_side_matches(
    group: &Fingerprint,
    other_group: &Fingerprint,
    other_sample: &Fingerprint,
) -> bool {
    for (key, value) in group.iter() {
        if is_unmeasured_reflection(key, value) {
            continue;
        }
        let expected = match other_group.get(key) {
            Some(v) => Some(v),
            None => other_sample.get(key),
        };
        if expected != Some(value) {
            return false;
        }
    }
    true
}
