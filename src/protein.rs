//! Empirical amino-acid replacement matrices.
//!
//! Each matrix is stored as its 190 exchangeabilities in PAML lower-triangle
//! order (`S[1][0], S[2][0], S[2][1], S[3][0], ...`) over the residue order
//! `ARNDCQEGHILKMFPSTWYV`, together with its equilibrium frequencies.

use crate::alignment::AMINO_ACIDS;

/// A fixed protein matrix.
#[derive(Debug, Clone, Copy)]
pub struct EmpiricalMatrix {
    exchange: &'static [f64; 190],
    freqs: &'static [f64; 20],
}

impl EmpiricalMatrix {
    /// Symmetric 20x20 exchangeabilities, flat `20*i+j`, zero diagonal.
    pub fn exchangeabilities(&self) -> Vec<f64> {
        let k = AMINO_ACIDS.len();
        let mut s = vec![0.0; k * k];
        let mut values = self.exchange.iter();
        for i in 1..k {
            for j in 0..i {
                let v = values.next().copied().unwrap_or(1.0);
                s[k * i + j] = v;
                s[k * j + i] = v;
            }
        }
        s
    }

    /// Equilibrium frequencies, renormalised to sum to one.
    pub fn frequencies(&self) -> Vec<f64> {
        let total: f64 = self.freqs.iter().sum();
        self.freqs.iter().map(|f| f / total).collect()
    }
}

pub const LG: EmpiricalMatrix = EmpiricalMatrix { exchange: &LG_EXCHANGE, freqs: &LG_FREQS };
pub const WAG: EmpiricalMatrix = EmpiricalMatrix { exchange: &WAG_EXCHANGE, freqs: &WAG_FREQS };
pub const JTT: EmpiricalMatrix = EmpiricalMatrix { exchange: &JTT_EXCHANGE, freqs: &JTT_FREQS };
pub const DAYHOFF: EmpiricalMatrix = EmpiricalMatrix { exchange: &DAYHOFF_EXCHANGE, freqs: &DAYHOFF_FREQS };

// Le & Gascuel (2008)

const LG_EXCHANGE: [f64; 190] = [
    0.425093, 0.276818, 0.751878, 0.395144, 0.123954, 5.076149, 2.489084, 0.534551,
    0.528768, 0.062556, 0.969894, 0.640346, 0.221500, 5.243870, 0.080556, 1.038545,
    0.363970, 0.228075, 0.611973, 0.210494, 5.221070, 2.317100, 0.361903, 0.227710,
    0.012693, 0.270720, 1.773733, 0.590559, 0.340530, 0.137505, 0.013266, 0.234489,
    0.360032, 0.068448, 0.243972, 0.653040, 0.024289, 0.104111, 0.047954, 0.419409,
    1.211550, 0.710170, 0.169264, 0.010040, 0.080045, 0.117910, 0.125383, 0.325711,
    0.471791, 0.062596, 0.235601, 0.013490, 0.326622, 0.015076, 0.054821, 0.061830,
    0.532476, 0.234850, 0.070570, 0.052886, 0.015750, 0.030174, 0.065441, 0.029890,
    0.225833, 0.190001, 0.131528, 0.012371, 1.331289, 0.348956, 0.019984, 0.296636,
    0.044261, 0.026612, 0.008607, 0.279425, 0.142088, 0.069683, 0.078862, 0.084808,
    0.252214, 0.044550, 0.115639, 1.190200, 4.863674, 0.547054, 0.442472, 0.782857,
    0.504551, 0.327059, 0.141552, 0.610460, 0.199099, 0.025346, 0.592036, 0.017614,
    0.155337, 0.092258, 0.115951, 0.310300, 0.049009, 0.208449, 0.055834, 0.044603,
    0.036397, 0.013012, 0.233413, 0.115866, 0.025625, 0.035855, 0.021282, 0.030880,
    0.012689, 1.473510, 0.152430, 0.051316, 0.076868, 0.195510, 0.031543, 0.249313,
    0.037897, 0.179240, 0.210332, 0.124665, 0.078698, 0.023918, 0.651028, 0.547105,
    0.024760, 0.075860, 0.021017, 0.064105, 0.248862, 0.082368, 0.306674, 0.024521,
    0.023196, 0.015152, 0.086619, 0.011982, 0.012538, 0.067393, 0.320627, 0.052790,
    0.180717, 0.069104, 0.032371, 0.018811, 0.017070, 0.040203, 0.145558, 0.032157,
    0.129315, 0.024469, 0.037159, 0.058082, 0.006712, 0.025548, 0.282959, 0.065389,
    0.081134, 0.025952, 0.014126, 0.013539, 0.034131, 0.020229, 0.017098, 0.073236,
    0.040653, 0.118938, 0.080488, 0.399748, 0.025060, 0.075004, 0.013927, 0.023920,
    0.015699, 0.035562, 0.116392, 0.039205, 0.200534, 0.145816, 0.273615, 0.139634,
    0.142754, 0.100111, 0.021362, 0.125872, 1.608126, 0.495130,
];

const LG_FREQS: [f64; 20] = [
    0.079066, 0.055941, 0.041977, 0.053052, 0.012937, 0.040767, 0.071586, 0.057337, 0.022355, 0.062157,
    0.099081, 0.064600, 0.022951, 0.042302, 0.044040, 0.061197, 0.053287, 0.012066, 0.034155, 0.069147,
];

// Whelan & Goldman (2001)

const WAG_EXCHANGE: [f64; 190] = [
    0.551571, 0.509848, 0.635346, 0.738998, 0.147304, 5.429420, 1.027040, 0.528191,
    0.528768, 0.017830, 0.908598, 0.627228, 0.211049, 4.854648, 0.080556, 1.015564,
    0.377422, 0.230756, 0.611973, 0.210494, 5.298530, 1.740159, 0.361903, 0.225167,
    0.013266, 0.303767, 1.733298, 0.596766, 0.347805, 0.141830, 0.013488, 0.199675,
    0.360032, 0.068448, 0.243972, 0.653040, 0.024712, 0.104111, 0.047954, 0.419409,
    0.930480, 0.635680, 0.149750, 0.013590, 0.086805, 0.116490, 0.165240, 0.354813,
    0.400141, 0.073086, 0.224968, 0.016240, 0.390192, 0.015882, 0.065641, 0.063010,
    0.472800, 0.230150, 0.067200, 0.054041, 0.015850, 0.030756, 0.057450, 0.030780,
    0.254310, 0.170100, 0.120368, 0.012650, 1.186630, 0.345880, 0.019840, 0.303530,
    0.044480, 0.038451, 0.008310, 0.266720, 0.137550, 0.067190, 0.071570, 0.082178,
    0.247800, 0.044580, 0.115540, 1.188020, 4.727180, 0.560420, 0.425860, 0.749920,
    0.506830, 0.320390, 0.147540, 0.588820, 0.196440, 0.027150, 0.595510, 0.017720,
    0.147710, 0.094340, 0.125220, 0.308330, 0.050890, 0.211320, 0.058020, 0.045740,
    0.035730, 0.013040, 0.263570, 0.116330, 0.024950, 0.034530, 0.022730, 0.031380,
    0.015010, 1.438260, 0.175050, 0.057390, 0.073580, 0.192380, 0.030370, 0.245950,
    0.041310, 0.192000, 0.207160, 0.126770, 0.077670, 0.024070, 0.633720, 0.556900,
    0.025660, 0.074070, 0.020540, 0.066800, 0.244650, 0.082260, 0.321550, 0.024530,
    0.024660, 0.016500, 0.084410, 0.012960, 0.012430, 0.076560, 0.300930, 0.055020,
    0.175700, 0.066320, 0.033300, 0.019900, 0.017430, 0.040380, 0.157960, 0.036920,
    0.122300, 0.024340, 0.035860, 0.048860, 0.008970, 0.028010, 0.291420, 0.070740,
    0.080800, 0.023960, 0.013550, 0.014880, 0.036180, 0.024310, 0.017490, 0.073800,
    0.038990, 0.112750, 0.069590, 0.374260, 0.025950, 0.067260, 0.014830, 0.024440,
    0.017570, 0.037950, 0.120130, 0.038530, 0.195780, 0.138070, 0.271610, 0.139850,
    0.127860, 0.108760, 0.023510, 0.130500, 1.587900, 0.481060,
];

const WAG_FREQS: [f64; 20] = [
    0.086628, 0.043972, 0.039089, 0.057045, 0.019308, 0.036728, 0.058059, 0.083252, 0.024431, 0.048466,
    0.086209, 0.062029, 0.019503, 0.038432, 0.045763, 0.069518, 0.061013, 0.014386, 0.035274, 0.070896,
];

// Jones, Taylor & Thornton (1992)

const JTT_EXCHANGE: [f64; 190] = [
    0.531678, 0.557967, 0.827445, 0.574478, 0.135906, 6.174160, 1.470910, 0.582457,
    0.593478, 0.021352, 1.071760, 0.679371, 0.264942, 5.461410, 0.089586, 1.192600,
    0.412204, 0.266080, 0.689530, 0.251849, 5.761810, 2.145780, 0.399770, 0.286027,
    0.010815, 0.279379, 2.141810, 0.634390, 0.381730, 0.165820, 0.013750, 0.248700,
    0.396050, 0.073558, 0.277460, 0.712760, 0.025680, 0.115110, 0.053120, 0.462310,
    1.113880, 0.757600, 0.183080, 0.011790, 0.092150, 0.127640, 0.139120, 0.345590,
    0.524200, 0.068760, 0.258890, 0.014870, 0.376090, 0.018023, 0.060000, 0.068740,
    0.567100, 0.252290, 0.076040, 0.058540, 0.017000, 0.033540, 0.072670, 0.032560,
    0.260230, 0.211540, 0.147060, 0.013780, 1.436200, 0.381580, 0.022230, 0.328250,
    0.049440, 0.029850, 0.009490, 0.305010, 0.157380, 0.074810, 0.085700, 0.091550,
    0.273690, 0.048830, 0.126540, 1.300530, 5.310590, 0.601590, 0.483060, 0.832790,
    0.551770, 0.354940, 0.161120, 0.645650, 0.215520, 0.029590, 0.653630, 0.019770,
    0.170090, 0.102390, 0.134670, 0.341530, 0.053540, 0.231280, 0.061570, 0.049690,
    0.039360, 0.014350, 0.287020, 0.126950, 0.027350, 0.038380, 0.024220, 0.034120,
    0.016540, 1.574630, 0.185780, 0.064010, 0.082150, 0.212420, 0.033960, 0.270290,
    0.044560, 0.202430, 0.224700, 0.139450, 0.085620, 0.026410, 0.701460, 0.602480,
    0.027880, 0.082250, 0.022670, 0.071150, 0.269670, 0.091260, 0.340220, 0.026770,
    0.026190, 0.017070, 0.093880, 0.013170, 0.013600, 0.084320, 0.346200, 0.060540,
    0.196460, 0.073870, 0.035910, 0.020850, 0.018890, 0.044240, 0.168220, 0.035680,
    0.140020, 0.026990, 0.040480, 0.063740, 0.009490, 0.028070, 0.316180, 0.077420,
    0.088850, 0.026600, 0.014860, 0.015710, 0.037820, 0.025330, 0.018950, 0.080240,
    0.042640, 0.128920, 0.078430, 0.428860, 0.027530, 0.082100, 0.015360, 0.026280,
    0.017190, 0.039060, 0.130060, 0.042590, 0.217840, 0.155650, 0.296100, 0.153780,
    0.147680, 0.118090, 0.023640, 0.138530, 1.752780, 0.517810,
];

const JTT_FREQS: [f64; 20] = [
    0.076748, 0.051691, 0.042645, 0.051544, 0.019803, 0.040752, 0.061830, 0.073152, 0.022944, 0.053761,
    0.091904, 0.058676, 0.023826, 0.040126, 0.050901, 0.068765, 0.058565, 0.014261, 0.032102, 0.066005,
];

// Dayhoff, Schwartz & Orcutt (1978)

const DAYHOFF_EXCHANGE: [f64; 190] = [
    0.267830, 0.487370, 0.869530, 0.362680, 0.069900, 5.740280, 1.094040, 0.444080,
    0.550060, 0.018660, 0.874470, 0.657580, 0.244600, 5.316010, 0.089070, 0.928810,
    0.367510, 0.227080, 0.614090, 0.249060, 5.015180, 1.872590, 0.302390, 0.226670,
    0.008260, 0.242090, 1.795390, 0.516060, 0.363700, 0.152500, 0.013740, 0.230200,
    0.360280, 0.068420, 0.243370, 0.654280, 0.028180, 0.101080, 0.049190, 0.398610,
    0.877800, 0.618020, 0.147300, 0.010580, 0.078960, 0.113810, 0.149830, 0.318610,
    0.411480, 0.065720, 0.202230, 0.013380, 0.326490, 0.013820, 0.054170, 0.061000,
    0.490010, 0.233860, 0.072740, 0.053560, 0.015600, 0.029780, 0.061250, 0.030020,
    0.232010, 0.190150, 0.127340, 0.012810, 1.276050, 0.347480, 0.019060, 0.289860,
    0.042140, 0.028460, 0.008660, 0.271810, 0.138680, 0.067370, 0.075780, 0.082140,
    0.246070, 0.043810, 0.112810, 1.178080, 4.609010, 0.539690, 0.413370, 0.754910,
    0.497280, 0.317480, 0.141820, 0.586780, 0.196540, 0.024830, 0.579590, 0.017200,
    0.148380, 0.091380, 0.119300, 0.300820, 0.048910, 0.203410, 0.051100, 0.043440,
    0.035710, 0.013030, 0.241320, 0.115470, 0.024540, 0.034410, 0.021610, 0.030670,
    0.012950, 1.426450, 0.157490, 0.049830, 0.075060, 0.188610, 0.029880, 0.245350,
    0.036920, 0.182170, 0.200150, 0.121750, 0.076180, 0.023690, 0.622870, 0.547600,
    0.024450, 0.073590, 0.019590, 0.063360, 0.239490, 0.080270, 0.303800, 0.024010,
    0.024600, 0.015160, 0.083020, 0.012470, 0.012270, 0.071960, 0.295990, 0.054230,
    0.168240, 0.063960, 0.032050, 0.018840, 0.016760, 0.039230, 0.148080, 0.033570,
    0.123810, 0.024080, 0.036640, 0.054980, 0.008430, 0.024880, 0.276100, 0.067290,
    0.078300, 0.024200, 0.013460, 0.014270, 0.034640, 0.021170, 0.016880, 0.071550,
    0.038260, 0.111790, 0.071430, 0.388840, 0.024510, 0.069600, 0.013730, 0.023580,
    0.015520, 0.034230, 0.116000, 0.038520, 0.195010, 0.135520, 0.266540, 0.134730,
    0.130150, 0.104280, 0.022070, 0.124070, 1.542000, 0.465670,
];

const DAYHOFF_FREQS: [f64; 20] = [
    0.087127, 0.040904, 0.040432, 0.046872, 0.033474, 0.038255, 0.049530, 0.088612, 0.033619, 0.036886,
    0.085357, 0.080481, 0.014753, 0.039772, 0.050680, 0.069577, 0.058542, 0.010494, 0.029916, 0.064718,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subst::RateMatrix;

    #[test]
    fn matrices_are_symmetric_and_positive() {
        for m in [LG, WAG, JTT, DAYHOFF] {
            let s = m.exchangeabilities();
            for i in 0..20 {
                assert_eq!(s[20 * i + i], 0.0);
                for j in (0..20).filter(|&j| j != i) {
                    assert!(s[20 * i + j] > 0.0);
                    assert_eq!(s[20 * i + j], s[20 * j + i]);
                }
            }
            assert!((m.frequencies().iter().sum::<f64>() - 1.0).abs() <= 1e-12);
        }
    }

    #[test]
    fn lg_places_first_entries() {
        let s = LG.exchangeabilities();
        // R-A, N-A, N-R, D-N
        assert_eq!(s[20], 0.425093);
        assert_eq!(s[40], 0.276818);
        assert_eq!(s[41], 0.751878);
        assert_eq!(s[3 * 20 + 2], 5.076149);
    }

    #[test]
    fn builds_rate_matrices() {
        for m in [LG, WAG, JTT, DAYHOFF] {
            let q = RateMatrix::new(&m.exchangeabilities(), &m.frequencies()).unwrap();
            let p = q.transition_matrix(0.5);
            for i in 0..20 {
                let row: f64 = p[20 * i..20 * (i + 1)].iter().sum();
                assert!((row - 1.0).abs() <= 1e-8);
            }
        }
    }
}
