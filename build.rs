//! Build script for rclone-mountctl
//!
//! Embeds version information and an application manifest into Windows builds.

fn main() {
    #[cfg(windows)]
    {
        windows_resources();
    }

    println!("cargo:rerun-if-changed=build.rs");
}

#[cfg(windows)]
fn windows_resources() {
    use std::io::Write;

    let mut res = winres::WindowsResource::new();
    res.set("FileDescription", "rclone remote and mount manager");
    res.set("ProductName", "rclone-mountctl");
    res.set_manifest(WINDOWS_MANIFEST);

    if let Err(e) = res.compile() {
        let mut stderr = std::io::stderr();
        let _ = writeln!(
            stderr,
            "cargo:warning=Failed to compile Windows resources: {}",
            e
        );
    }
}

#[cfg(windows)]
const WINDOWS_MANIFEST: &str = r#"
<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v1" manifestVersion="1.0">
  <assemblyIdentity
    version="0.1.0.0"
    processorArchitecture="*"
    name="RcloneMountctl"
    type="win32"
  />
  <description>rclone remote and mount manager</description>

  <!-- Mounting through WinFsp needs no elevation -->
  <trustInfo xmlns="urn:schemas-microsoft-com:asm.v3">
    <security>
      <requestedPrivileges>
        <requestedExecutionLevel level="asInvoker" uiAccess="false"/>
      </requestedPrivileges>
    </security>
  </trustInfo>

  <compatibility xmlns="urn:schemas-microsoft-com:compatibility.v1">
    <application>
      <!-- Windows 10/11 -->
      <supportedOS Id="{8e0f7a12-bfb3-4fe8-b9a5-48fd50a15a9a}"/>
    </application>
  </compatibility>
</assembly>
"#;
