use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chain_forge_glsl::{
    compiler::{GlslVersion, Precision, Registry},
    dsl, schema,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Clone)]
struct Cli {
    script: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    glsl_version: Option<GlslVersion>,
    precision: Option<Precision>,
    catalog: Option<PathBuf>,
    list: bool,
}

const USAGE: &str = "supported: --script <chain.json>, --out-dir <dir>, --glsl-version <100|300>, --precision <lowp|mediump|highp>, --catalog <transforms.json>, --list";

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag {
            "--list" => {
                cli.list = true;
                i += 1;
                continue;
            }
            "--script" => cli.script = Some(PathBuf::from(value()?)),
            "--out-dir" | "--output-dir" => cli.output_dir = Some(PathBuf::from(value()?)),
            "--glsl-version" => cli.glsl_version = Some(value()?.parse()?),
            "--precision" => cli.precision = Some(value()?.parse()?),
            "--catalog" => cli.catalog = Some(PathBuf::from(value()?)),
            other => return Err(anyhow!("unknown argument: {other} ({USAGE})")),
        }
        i += 2;
    }
    Ok(cli)
}

fn base_registry(catalog: Option<&Path>) -> Result<Registry> {
    match catalog {
        Some(path) => {
            let descriptors = schema::load_catalog_from_path(path)?;
            Ok(Registry::from_descriptors(&descriptors))
        }
        None => Ok(Registry::with_builtins()),
    }
}

fn transform_listing(registry: &Registry) -> String {
    let mut out = String::new();
    for t in registry.iter() {
        out.push_str(&format!("{:<14} {}\n", t.category.name(), t.signature()));
    }
    let roots: Vec<&str> = registry.roots().map(|t| t.name.as_str()).collect();
    out.push_str(&format!("\nchain roots: {}\n", roots.join(", ")));
    out
}

fn run(cli: Cli) -> Result<()> {
    let registry = base_registry(cli.catalog.as_deref())?;
    if cli.list {
        print!("{}", transform_listing(&registry));
        return Ok(());
    }

    let script_path = cli
        .script
        .ok_or_else(|| anyhow!("nothing to do ({USAGE})"))?;
    let mut script = dsl::load_script_from_path(&script_path)?;
    if let Some(v) = cli.glsl_version {
        script.options.glsl_version = v;
    }
    if let Some(p) = cli.precision {
        script.options.precision = p;
    }

    let program = dsl::compile_script(&registry, &script)?;
    info!(
        group = %program.group,
        uniforms = program.uniforms.len(),
        "compiled {}",
        script_path.display()
    );

    let Some(out_dir) = cli.output_dir else {
        println!("// fragment\n{}", program.fragment);
        println!("// vertex\n{}", program.vertex);
        return Ok(());
    };

    let stem = script_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chain");
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    for (ext, text) in [("frag", &program.fragment), ("vert", &program.vertex)] {
        let path = out_dir.join(format!("{stem}.{ext}"));
        std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
        println!("saved: {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    run(parse_cli(&argv)?)
}

#[cfg(test)]
mod tests {
    use chain_forge_glsl::compiler::OperationDescriptor;

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_cli_script_outdir_and_options() {
        let cli = parse_cli(&args(&[
            "--script",
            "chain.json",
            "--out-dir",
            "out",
            "--glsl-version",
            "100",
            "--precision",
            "mediump",
        ]))
        .unwrap();
        assert_eq!(cli.script.as_ref().unwrap(), &PathBuf::from("chain.json"));
        assert_eq!(cli.output_dir.as_ref().unwrap(), &PathBuf::from("out"));
        assert_eq!(cli.glsl_version, Some(GlslVersion::Es100));
        assert_eq!(cli.precision, Some(Precision::Mediump));
        assert!(!cli.list);
    }

    #[test]
    fn parse_cli_rejects_unknown_and_incomplete_flags() {
        assert!(parse_cli(&args(&["--list"])).unwrap().list);
        assert!(parse_cli(&args(&["--frobnicate"])).is_err());
        assert!(parse_cli(&args(&["--script"])).is_err());
        assert!(parse_cli(&args(&["--glsl-version", "450"])).is_err());
    }

    #[test]
    fn listing_shows_signatures_and_chain_roots() {
        let registry = Registry::from_descriptors(&[
            OperationDescriptor::new("plain", "src", "return vec4(1.0);"),
            OperationDescriptor::new("invert", "color", "return _c0;"),
        ]);
        let listing = transform_listing(&registry);
        assert!(listing.contains("vec4 plain(vec2 _st)"), "{listing}");
        assert!(listing.contains("vec4 invert(vec4 _c0)"), "{listing}");
        assert!(listing.ends_with("chain roots: plain\n"), "{listing}");
    }
}
