/// Substitute `{input}` with the user's input, then each `{<node id>}` with
/// that predecessor's output.
///
/// Substitution is literal and sequential: text introduced by an earlier
/// replacement is subject to later ones. Unknown placeholders are left as-is.
pub fn build_prompt<'a, I>(template: &str, input: &str, predecessor_outputs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut prompt = template.replace("{input}", input);
    for (node_id, output) in predecessor_outputs {
        prompt = prompt.replace(&format!("{{{node_id}}}"), output);
    }
    prompt
}
