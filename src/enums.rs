use clap::ValueEnum;

/// Container format for reconstructed volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Nifti,
    Nrrd,
}

impl OutputFormat {
    /// Extension for intensity volume files.
    pub fn intensity_extension(&self) -> &'static str {
        match self {
            OutputFormat::Nifti => "nii",
            OutputFormat::Nrrd => "nrrd",
        }
    }

    /// Extension for label volume files. NRRD label files use the
    /// `.seg.nrrd` convention so viewers pick up the segment header fields.
    pub fn label_extension(&self) -> &'static str {
        match self {
            OutputFormat::Nifti => "nii",
            OutputFormat::Nrrd => "seg.nrrd",
        }
    }

    /// Default output directory name beside the catalog file.
    pub fn output_dir_name(&self) -> &'static str {
        match self {
            OutputFormat::Nifti => "NIFTI",
            OutputFormat::Nrrd => "NRRD",
        }
    }
}
