//! Throwaway certificate hierarchy for tests: root -> intermediate -> leaves

use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

pub struct TestPki {
    pub root: Certificate,
    pub root_key: KeyPair,
    pub intermediate: Certificate,
    pub intermediate_key: KeyPair,
}

pub struct Issued {
    pub cert: Certificate,
    pub key: KeyPair,
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::new()).expect("empty SAN list is valid");
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params
}

impl TestPki {
    pub fn new(name: &str) -> Self {
        let root_key = KeyPair::generate().expect("Failed to generate root key");
        let root = ca_params(&format!("{} Root CA", name))
            .self_signed(&root_key)
            .expect("Failed to self-sign root");

        let intermediate_key = KeyPair::generate().expect("Failed to generate intermediate key");
        let intermediate = ca_params(&format!("{} Intermediate CA", name))
            .signed_by(&intermediate_key, &root, &root_key)
            .expect("Failed to sign intermediate");

        Self {
            root,
            root_key,
            intermediate,
            intermediate_key,
        }
    }

    /// Intermediate followed by root, the way the device's bundle is laid out
    pub fn chain_pem(&self) -> String {
        format!("{}{}", self.intermediate.pem(), self.root.pem())
    }

    pub fn issue_server(&self, names: &[&str]) -> Issued {
        self.issue(names, ExtendedKeyUsagePurpose::ServerAuth)
    }

    pub fn issue_client(&self) -> Issued {
        self.issue(&["device-0001"], ExtendedKeyUsagePurpose::ClientAuth)
    }

    fn issue(&self, names: &[&str], purpose: ExtendedKeyUsagePurpose) -> Issued {
        let key = KeyPair::generate().expect("Failed to generate leaf key");
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names).expect("Invalid SAN");
        params.is_ca = IsCa::ExplicitNoCa;
        params.extended_key_usages = vec![purpose];
        let cert = params
            .signed_by(&key, &self.intermediate, &self.intermediate_key)
            .expect("Failed to sign leaf");
        Issued { cert, key }
    }
}

impl Issued {
    /// Leaf followed by the issuing intermediate
    pub fn cert_pem_with_chain(&self, pki: &TestPki) -> String {
        format!("{}{}", self.cert.pem(), pki.intermediate.pem())
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    pub fn der_chain(&self, pki: &TestPki) -> Vec<CertificateDer<'static>> {
        vec![self.cert.der().clone(), pki.intermediate.der().clone()]
    }

    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()))
    }
}

/// Client certificate, key and trust bundle written out as PEM files
pub struct CertFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub chain: PathBuf,
}

pub fn write_cert_files(dir: &Path, pki: &TestPki, client: &Issued) -> CertFiles {
    let files = CertFiles {
        cert: dir.join("clientcert.crt"),
        key: dir.join("private.key"),
        chain: dir.join("cert-chain.crt"),
    };
    std::fs::write(&files.cert, client.cert_pem_with_chain(pki)).expect("write cert");
    std::fs::write(&files.key, client.key_pem()).expect("write key");
    std::fs::write(&files.chain, pki.chain_pem()).expect("write chain");
    files
}
