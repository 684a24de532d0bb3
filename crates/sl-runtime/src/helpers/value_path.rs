use sl_core::SlValue;

/// Splits `a.b.c` into segments. Empty segments make the path invalid.
pub(crate) fn parse_ref_path(path: &str) -> Option<Vec<String>> {
    let segments = path
        .split('.')
        .map(str::trim)
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if segments.iter().any(String::is_empty) {
        return None;
    }
    Some(segments)
}

pub(crate) fn read_nested_path<'a>(target: &'a SlValue, path: &[String]) -> Result<&'a SlValue, String> {
    path.iter().try_fold(target, |current, segment| match current {
        SlValue::Map(entries) => entries
            .get(segment)
            .ok_or_else(|| format!("missing key \"{}\"", segment)),
        _ => Err(format!("\"{}\" is read from a non-map value", segment)),
    })
}

pub(crate) fn assign_nested_path(
    target: &mut SlValue,
    path: &[String],
    value: SlValue,
) -> Result<(), String> {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };

    let SlValue::Map(entries) = target else {
        return Err("target is not an object/map".to_string());
    };

    if rest.is_empty() {
        entries.insert(head.clone(), value);
        return Ok(());
    }

    let next = entries
        .get_mut(head)
        .ok_or_else(|| format!("missing key \"{}\"", head))?;
    assign_nested_path(next, rest, value)
}
