fn main() {
    uniffi::generate_scaffolding("src/desidua.udl").unwrap();

    // Keep the Java_org_webrtc_* JNI symbols that webrtc::InitAndroid calls back into.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("android") {
        webrtc_sys_build::configure_jni_symbols()
            .expect("failed to configure JNI symbols for Android");
    }
}
