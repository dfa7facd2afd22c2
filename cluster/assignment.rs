use crate::cluster::ClusterError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// How member columns are pooled into one reduced column.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Pooling {
    #[default]
    Mean,
    Median,
}

/// A fitted partition of feature indices into `n_clusters` non-empty,
/// disjoint clusters.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
    sizes: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl ClusterAssignment {
    /// Validates `labels` as a partition into exactly `n_clusters` clusters.
    pub fn from_labels(labels: Vec<usize>, n_clusters: usize) -> Result<Self, ClusterError> {
        if n_clusters == 0 || n_clusters > labels.len() {
            return Err(ClusterError::InvalidClusterCount {
                n_clusters,
                n_features: labels.len(),
            });
        }
        let mut members = vec![Vec::new(); n_clusters];
        for (feature, &label) in labels.iter().enumerate() {
            if label >= n_clusters {
                return Err(ClusterError::LabelOutOfRange {
                    feature,
                    label,
                    n_clusters,
                });
            }
            members[label].push(feature);
        }
        let found = members.iter().filter(|m| !m.is_empty()).count();
        if found < n_clusters {
            return Err(ClusterError::Degenerate {
                expected: n_clusters,
                found,
            });
        }
        let sizes = members.iter().map(Vec::len).collect();
        Ok(Self {
            labels,
            sizes,
            members,
        })
    }

    pub fn n_features(&self) -> usize {
        self.labels.len()
    }

    pub fn n_clusters(&self) -> usize {
        self.sizes.len()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn members(&self, cluster: usize) -> &[usize] {
        &self.members[cluster]
    }

    /// Cluster-mean aggregation of the columns of `x`.
    pub fn reduce(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ClusterError> {
        self.reduce_with(x, Pooling::Mean)
    }

    pub fn reduce_with(
        &self,
        x: ArrayView2<f64>,
        pooling: Pooling,
    ) -> Result<Array2<f64>, ClusterError> {
        if x.ncols() != self.n_features() {
            return Err(ClusterError::LengthMismatch {
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        let mut reduced = Array2::zeros((x.nrows(), self.n_clusters()));
        for (k, mut column) in reduced.axis_iter_mut(Axis(1)).enumerate() {
            let block = x.select(Axis(1), &self.members[k]);
            match pooling {
                Pooling::Mean => {
                    if let Some(mean) = block.mean_axis(Axis(1)) {
                        column.assign(&mean);
                    }
                }
                Pooling::Median => {
                    for (value, row) in column.iter_mut().zip(block.axis_iter(Axis(0))) {
                        *value = median(row);
                    }
                }
            }
        }
        Ok(reduced)
    }

    /// Broadcasts a per-cluster statistic to every member feature.
    pub fn inverse(&self, reduced: ArrayView1<f64>) -> Result<Array1<f64>, ClusterError> {
        self.check_len(reduced.len())?;
        Ok(self.labels.iter().map(|&label| reduced[label]).collect())
    }

    /// Broadcasts a pooled coefficient, dividing by the size of its cluster so
    /// the per-feature attributions add back up to the cluster coefficient.
    pub fn inverse_scaled(&self, reduced: ArrayView1<f64>) -> Result<Array1<f64>, ClusterError> {
        self.check_len(reduced.len())?;
        Ok(self
            .labels
            .iter()
            .map(|&label| reduced[label] / self.sizes[label] as f64)
            .collect())
    }

    /// Row-wise [`Self::inverse_scaled`] for `n_clusters × n_times` estimates.
    pub fn inverse_scaled_rows(
        &self,
        reduced: ArrayView2<f64>,
    ) -> Result<Array2<f64>, ClusterError> {
        self.check_len(reduced.nrows())?;
        let mut full = Array2::zeros((self.n_features(), reduced.ncols()));
        for (feature, mut row) in full.axis_iter_mut(Axis(0)).enumerate() {
            let label = self.labels[feature];
            let size = self.sizes[label] as f64;
            row.assign(&reduced.row(label).mapv(|v| v / size));
        }
        Ok(full)
    }

    fn check_len(&self, found: usize) -> Result<(), ClusterError> {
        if found != self.n_clusters() {
            return Err(ClusterError::LengthMismatch {
                expected: self.n_clusters(),
                found,
            });
        }
        Ok(())
    }
}

fn median(values: ArrayView1<f64>) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn three_way() -> ClusterAssignment {
        ClusterAssignment::from_labels(vec![0, 0, 1, 2, 2, 2], 3).unwrap()
    }

    #[test]
    fn sizes_sum_to_feature_count() {
        let assignment = three_way();
        assert_eq!(assignment.sizes(), &[2, 1, 3]);
        assert_eq!(assignment.sizes().iter().sum::<usize>(), assignment.n_features());
        assert_eq!(assignment.members(2), &[3, 4, 5]);
    }

    #[test]
    fn empty_cluster_is_degenerate() {
        let err = ClusterAssignment::from_labels(vec![0, 0, 2, 2], 3).unwrap_err();
        assert_eq!(err, ClusterError::Degenerate { expected: 3, found: 2 });
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        let err = ClusterAssignment::from_labels(vec![0, 1, 5], 2).unwrap_err();
        assert!(matches!(err, ClusterError::LabelOutOfRange { feature: 2, label: 5, .. }));
    }

    #[test]
    fn reduce_takes_cluster_means() {
        let assignment = three_way();
        let x = array![[1.0, 3.0, 5.0, 1.0, 2.0, 3.0], [0.0, 2.0, -1.0, 4.0, 4.0, 4.0]];
        let reduced = assignment.reduce(x.view()).unwrap();
        assert_eq!(reduced.dim(), (2, 3));
        assert_abs_diff_eq!(reduced[[0, 0]], 2.0);
        assert_abs_diff_eq!(reduced[[0, 1]], 5.0);
        assert_abs_diff_eq!(reduced[[0, 2]], 2.0);
        assert_abs_diff_eq!(reduced[[1, 0]], 1.0);
        assert_abs_diff_eq!(reduced[[1, 2]], 4.0);
    }

    #[test]
    fn median_pooling_ignores_outliers() {
        let assignment = ClusterAssignment::from_labels(vec![0, 0, 0], 1).unwrap();
        let x = array![[1.0, 2.0, 100.0]];
        let reduced = assignment.reduce_with(x.view(), Pooling::Median).unwrap();
        assert_abs_diff_eq!(reduced[[0, 0]], 2.0);
    }

    #[test]
    fn inverse_broadcasts_constant() {
        let assignment = three_way();
        let full = assignment.inverse(array![0.5, 0.5, 0.5].view()).unwrap();
        assert_eq!(full.len(), 6);
        assert!(full.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn inverse_scaled_divides_by_cluster_size() {
        let assignment = three_way();
        let full = assignment.inverse_scaled(array![6.0, 6.0, 6.0].view()).unwrap();
        assert_eq!(full.to_vec(), vec![3.0, 3.0, 6.0, 2.0, 2.0, 2.0]);

        let rows = assignment
            .inverse_scaled_rows(array![[2.0, 4.0], [1.0, 1.0], [3.0, 0.0]].view())
            .unwrap();
        assert_eq!(rows.row(0).to_vec(), vec![1.0, 2.0]);
        assert_eq!(rows.row(5).to_vec(), vec![1.0, 0.0]);
    }

    #[test]
    fn inverse_rejects_wrong_length() {
        let assignment = three_way();
        assert!(assignment.inverse(array![1.0, 2.0].view()).is_err());
    }
}
