use anyhow::{Context, anyhow, bail};

use crate::data_structures::material::{Material, Pass, SceneBlend, Technique};

#[derive(Debug, PartialEq)]
enum Block {
    Material,
    Technique,
    Pass,
    TextureUnit,
}

/// Parses a material script, which may define several materials:
///
/// ```text
/// // comment
/// material glass
/// {
///     technique
///     {
///         pass
///         {
///             depth_write off
///             scene_blend alpha_blend
///             diffuse 1 1 1 0.5
///             texture_unit { texture 8dcd4a48-2d37-4909-9f78-f7a9eb4ef903 }
///         }
///     }
/// }
/// ```
pub fn parse_material_script(text: &str) -> anyhow::Result<Vec<Material>> {
    let mut materials = Vec::new();
    let mut stack: Vec<Block> = Vec::new();
    let mut current: Option<Material> = None;
    // the keyword seen on a line, waiting for its opening brace
    let mut pending: Option<Block> = None;

    let tokens: Vec<(usize, Vec<String>)> = text
        .lines()
        .enumerate()
        .map(|(no, line)| {
            let line = line.split("//").next().unwrap_or("");
            let spaced = line.replace('{', " { ").replace('}', " } ");
            (no + 1, spaced.split_whitespace().map(str::to_string).collect())
        })
        .collect();

    for (line_no, line) in tokens {
        let mut words = line.iter().map(String::as_str).peekable();
        while let Some(word) = words.next() {
            match word {
                "{" => {
                    let block = pending
                        .take()
                        .ok_or_else(|| anyhow!("line {}: unexpected '{{'", line_no))?;
                    stack.push(block);
                }
                "}" => match stack.pop() {
                    Some(Block::Material) => {
                        let material = current
                            .take()
                            .ok_or_else(|| anyhow!("line {}: material block without material", line_no))?;
                        materials.push(material);
                    }
                    Some(_) => (),
                    None => bail!("line {}: unmatched '}}'", line_no),
                },
                "material" => {
                    if !stack.is_empty() {
                        bail!("line {}: nested material definition", line_no);
                    }
                    let name = words
                        .next()
                        .filter(|w| *w != "{")
                        .ok_or_else(|| anyhow!("line {}: material needs a name", line_no))?;
                    current = Some(Material {
                        name: name.to_string(),
                        techniques: Vec::new(),
                    });
                    pending = Some(Block::Material);
                }
                "technique" => {
                    if stack.last() != Some(&Block::Material) {
                        bail!("line {}: technique outside of material", line_no);
                    }
                    skip_name(&mut words);
                    if let Some(material) = current.as_mut() {
                        material.techniques.push(Technique::default());
                    }
                    pending = Some(Block::Technique);
                }
                "pass" => {
                    if stack.last() != Some(&Block::Technique) {
                        bail!("line {}: pass outside of technique", line_no);
                    }
                    skip_name(&mut words);
                    if let Some(technique) = current.as_mut().and_then(|m| m.techniques.last_mut()) {
                        technique.passes.push(Pass::default());
                    }
                    pending = Some(Block::Pass);
                }
                "texture_unit" => {
                    if stack.last() != Some(&Block::Pass) {
                        bail!("line {}: texture_unit outside of pass", line_no);
                    }
                    skip_name(&mut words);
                    pending = Some(Block::TextureUnit);
                }
                attribute => {
                    let pass = current
                        .as_mut()
                        .and_then(|m| m.techniques.last_mut())
                        .and_then(|t| t.passes.last_mut())
                        .filter(|_| matches!(stack.last(), Some(Block::Pass | Block::TextureUnit)))
                        .ok_or_else(|| anyhow!("line {}: '{}' outside of pass", line_no, attribute))?;
                    let mut args: Vec<&str> = Vec::new();
                    while let Some(&arg) = words.peek() {
                        if arg == "{" || arg == "}" {
                            break;
                        }
                        args.push(arg);
                        words.next();
                    }
                    apply_attribute(pass, attribute, &args)
                        .with_context(|| format!("line {}", line_no))?;
                }
            }
        }
    }

    if !stack.is_empty() || pending.is_some() {
        bail!("unterminated block at end of script");
    }
    if materials.is_empty() {
        bail!("script defines no materials");
    }
    Ok(materials)
}

fn skip_name<'a>(words: &mut std::iter::Peekable<impl Iterator<Item = &'a str>>) {
    if words.peek().is_some_and(|w| *w != "{") {
        words.next();
    }
}

fn apply_attribute(pass: &mut Pass, attribute: &str, args: &[&str]) -> anyhow::Result<()> {
    match attribute {
        "depth_write" => {
            pass.depth_write = match args.first() {
                Some(&"on") => true,
                Some(&"off") => false,
                other => bail!("depth_write expects on|off, got {:?}", other),
            };
        }
        "scene_blend" => {
            let mode = args.first().ok_or_else(|| anyhow!("scene_blend needs a mode"))?;
            pass.scene_blend =
                SceneBlend::parse(mode).ok_or_else(|| anyhow!("unknown scene_blend '{}'", mode))?;
        }
        "diffuse" => {
            if args.len() < 3 || args.len() > 4 {
                bail!("diffuse expects 3 or 4 components");
            }
            let mut colour = [1.0f32; 4];
            for (slot, arg) in colour.iter_mut().zip(args) {
                *slot = arg
                    .parse()
                    .with_context(|| format!("invalid colour component '{}'", arg))?;
            }
            pass.diffuse = colour;
        }
        "texture" => {
            let id = args.first().ok_or_else(|| anyhow!("texture needs an identifier"))?;
            pass.texture = Some(id.to_string());
        }
        other => log::debug!("ignoring unsupported material attribute '{}'", other),
    }
    Ok(())
}
