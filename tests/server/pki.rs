//! Throwaway certificate authority for server tests.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

pub struct Issued {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()))
    }
}

pub struct TestCa {
    ca: Issued,
}

fn named(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn
}

impl TestCa {
    pub fn new(name: &str) -> Self {
        let key = KeyPair::generate().expect("should generate CA key");
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("should build params");
        params.distinguished_name = named(name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).expect("should self-sign CA");
        Self {
            ca: Issued { cert, key },
        }
    }

    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.ca.cert_der()
    }

    pub fn server(&self, host: &str) -> Issued {
        let mut params =
            CertificateParams::new(vec![host.to_owned()]).expect("should build server params");
        params.distinguished_name = named(host);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.issue(params)
    }

    pub fn client(&self, common_name: &str) -> Issued {
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("should build params");
        params.distinguished_name = named(common_name);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.issue(params)
    }

    fn issue(&self, params: CertificateParams) -> Issued {
        let key = KeyPair::generate().expect("should generate leaf key");
        let cert = params
            .signed_by(&key, &self.ca.cert, &self.ca.key)
            .expect("should sign leaf");
        Issued { cert, key }
    }

    /// Write `ca.pem`, `server.pem` (cert) and `server.key`; return their paths.
    pub fn write_server_files(&self, dir: &Path, server: &Issued) -> (PathBuf, PathBuf, PathBuf) {
        let ca = dir.join("ca.pem");
        let cert = dir.join("server.pem");
        let key = dir.join("server.key");
        fs::write(&ca, self.ca.cert.pem()).expect("should write CA");
        fs::write(&cert, server.cert.pem()).expect("should write server cert");
        fs::write(&key, server.key.serialize_pem()).expect("should write server key");
        (ca, cert, key)
    }
}
