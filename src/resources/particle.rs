use anyhow::{Context, anyhow, bail};

/// Emitter parameters of a particle system script.
#[derive(Clone, Debug, PartialEq)]
pub struct ParticleTemplate {
    pub name: String,
    pub quota: u32,
    pub material: String,
    pub emission_rate: f32,
    pub lifetime: f32,
    pub colour: [f32; 4],
}

/// Parses the first `particle_system` block of a script:
///
/// ```text
/// particle_system sparks
/// {
///     quota 200
///     material spark
///     emission_rate 50
///     lifetime 1.5
///     colour 1 0.8 0.2 1
/// }
/// ```
pub fn parse_particle_script(text: &str) -> anyhow::Result<ParticleTemplate> {
    let mut template: Option<ParticleTemplate> = None;
    let mut depth = 0usize;

    for (no, line) in text.lines().enumerate() {
        let line_no = no + 1;
        let line = line.split("//").next().unwrap_or("");
        let spaced = line.replace('{', " { ").replace('}', " } ");
        let words: Vec<&str> = spaced.split_whitespace().collect();
        let mut idx = 0;
        while idx < words.len() {
            match words[idx] {
                "particle_system" if depth == 0 => {
                    if template.is_some() {
                        // only the first system of a script is used
                        return finish(template);
                    }
                    let name = words
                        .get(idx + 1)
                        .filter(|w| **w != "{")
                        .ok_or_else(|| anyhow!("line {}: particle_system needs a name", line_no))?;
                    template = Some(ParticleTemplate {
                        name: name.to_string(),
                        quota: 10,
                        material: String::new(),
                        emission_rate: 10.0,
                        lifetime: 1.0,
                        colour: [1.0; 4],
                    });
                    idx += 2;
                }
                "{" => {
                    depth += 1;
                    idx += 1;
                }
                "}" => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| anyhow!("line {}: unmatched '}}'", line_no))?;
                    idx += 1;
                }
                key => {
                    let system = template
                        .as_mut()
                        .filter(|_| depth > 0)
                        .ok_or_else(|| anyhow!("line {}: '{}' outside of particle_system", line_no, key))?;
                    let args: Vec<&str> = words[idx + 1..]
                        .iter()
                        .take_while(|w| **w != "{" && **w != "}")
                        .copied()
                        .collect();
                    idx += 1 + args.len();
                    // nested emitter/affector blocks are accepted but not interpreted
                    if depth > 1 {
                        continue;
                    }
                    apply(system, key, &args).with_context(|| format!("line {}", line_no))?;
                }
            }
        }
    }
    if depth != 0 {
        bail!("unterminated particle_system block");
    }
    finish(template)
}

fn finish(template: Option<ParticleTemplate>) -> anyhow::Result<ParticleTemplate> {
    let template = template.ok_or_else(|| anyhow!("script defines no particle_system"))?;
    if template.material.is_empty() {
        bail!("particle_system '{}' has no material", template.name);
    }
    Ok(template)
}

fn apply(system: &mut ParticleTemplate, key: &str, args: &[&str]) -> anyhow::Result<()> {
    let first = || args.first().copied().ok_or_else(|| anyhow!("'{}' needs a value", key));
    match key {
        "quota" => system.quota = first()?.parse().context("invalid quota")?,
        "material" => system.material = first()?.to_string(),
        "emission_rate" => system.emission_rate = first()?.parse().context("invalid emission_rate")?,
        "lifetime" => system.lifetime = first()?.parse().context("invalid lifetime")?,
        "colour" => {
            if args.len() < 3 {
                bail!("colour expects 3 or 4 components");
            }
            for (slot, arg) in system.colour.iter_mut().zip(args) {
                *slot = arg.parse().context("invalid colour component")?;
            }
        }
        // emitter/affector keywords open nested blocks handled above
        "emitter" | "affector" => (),
        other => log::debug!("ignoring unsupported particle attribute '{}'", other),
    }
    Ok(())
}
